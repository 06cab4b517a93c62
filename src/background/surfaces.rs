//! Capture surface bookkeeping
//!
//! The host opens, focuses and closes surfaces through [`SurfaceLauncher`].
//! [`SurfaceRegistry`] enforces that at most one surface is active.

use crate::bus::SurfaceId;
use crate::utils::error::AppResult;
use async_trait::async_trait;

#[async_trait]
pub trait SurfaceLauncher: Send + Sync {
    /// Open a new capture surface. It must be listening on the bus when this returns.
    async fn open(&self) -> AppResult<SurfaceId>;

    async fn focus(&self, id: SurfaceId) -> AppResult<()>;

    async fn close(&self, id: SurfaceId) -> AppResult<()>;

    fn is_open(&self, id: SurfaceId) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Became the active surface
    Accepted,
    /// Already the active surface
    AlreadyKnown,
    /// Another surface is active and must be kept
    Duplicate { original: SurfaceId },
}

#[derive(Debug, Default)]
pub struct SurfaceRegistry {
    active: Option<SurfaceId>,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<SurfaceId> {
        self.active
    }

    pub fn admit(&mut self, id: SurfaceId) -> Admission {
        match self.active {
            Some(active) if active == id => Admission::AlreadyKnown,
            Some(original) => Admission::Duplicate { original },
            None => {
                self.active = Some(id);
                Admission::Accepted
            }
        }
    }

    /// Forget `id` if it is the active surface
    pub fn release(&mut self, id: SurfaceId) -> bool {
        if self.active == Some(id) {
            self.active = None;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_active_surface() {
        let mut registry = SurfaceRegistry::new();
        let first = SurfaceId::new();
        let second = SurfaceId::new();

        assert_eq!(registry.admit(first), Admission::Accepted);
        assert_eq!(registry.admit(first), Admission::AlreadyKnown);
        assert_eq!(registry.admit(second), Admission::Duplicate { original: first });

        assert!(!registry.release(second));
        assert!(registry.release(first));
        assert_eq!(registry.admit(second), Admission::Accepted);
    }
}
