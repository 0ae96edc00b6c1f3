use std::sync::Arc;

use crate::Result;

/// A reliable, ordered request/response channel to an engine.
///
/// `request` sends one encoded message and blocks until the matching encoded
/// response arrives. Malformed or rejected messages yield [`crate::Error::Protocol`].
pub trait Connection: Send + Sync {
    fn request(&self, message: &str) -> Result<String>;
}

impl<C> Connection for Arc<C>
where
    C: Connection + ?Sized,
{
    fn request(&self, message: &str) -> Result<String> {
        (**self).request(message)
    }
}

impl<C> Connection for Box<C>
where
    C: Connection + ?Sized,
{
    fn request(&self, message: &str) -> Result<String> {
        (**self).request(message)
    }
}
