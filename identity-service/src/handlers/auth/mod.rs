pub mod methods;
pub mod registration;
pub mod session;

pub use methods::{list_auth_methods, unlink_auth_method};
pub use registration::register;
pub use session::{login, logout, logout_all, me, refresh};
