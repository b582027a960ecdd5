pub mod desk;
pub mod memory;
pub mod retry;

pub use desk::DelayDesk;
pub use memory::InMemoryDelayRepository;
