mod aggregate;
mod unqueue;
mod retry;
