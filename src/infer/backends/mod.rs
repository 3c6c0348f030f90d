pub mod identity;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use identity::IdentityBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
