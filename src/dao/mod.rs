/// Room repository trait, its writes and the in-memory implementation.
pub mod room_store;
/// Storage error types shared by repository implementations.
pub mod storage;
