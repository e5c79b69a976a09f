pub mod slot;
pub mod swap_request;
pub mod user;

pub use slot::SlotRepository;
pub use swap_request::SwapRequestRepository;
pub use user::UserRepository;
