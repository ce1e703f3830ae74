use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LeaseError {
    #[error("lease '{name}' unavailable: {reason}")]
    Unavailable { name: String, reason: String },
    #[error("lease '{name}' backend failure: {reason}")]
    Backend { name: String, reason: String },
}

impl LeaseError {
    pub fn unavailable(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn backend(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Backend {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// A platform resource held for the duration of a mesh session, such as a
/// wake lock or a foreground service slot.
pub trait ResourceLease: Send + Sync {
    fn name(&self) -> &str;
    fn acquire(&self) -> Result<(), LeaseError>;
    fn release(&self) -> Result<(), LeaseError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLease;

impl ResourceLease for NoopLease {
    fn name(&self) -> &str {
        "noop"
    }

    fn acquire(&self) -> Result<(), LeaseError> {
        Ok(())
    }

    fn release(&self) -> Result<(), LeaseError> {
        Ok(())
    }
}

/// Ordered set of leases acquired together when a session starts.
///
/// Acquisition is all-or-nothing: a failure rolls back the leases already
/// taken, in reverse order. Release also runs in reverse order and keeps
/// going past individual failures.
#[derive(Default)]
pub struct LeaseSet {
    leases: Vec<Box<dyn ResourceLease>>,
}

impl LeaseSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, lease: impl ResourceLease + 'static) -> Self {
        self.leases.push(Box::new(lease));
        self
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    pub fn acquire_all(&self) -> Result<(), LeaseError> {
        for (index, lease) in self.leases.iter().enumerate() {
            if let Err(err) = lease.acquire() {
                for held in self.leases[..index].iter().rev() {
                    let _ = held.release();
                }
                return Err(err);
            }
        }
        Ok(())
    }

    pub fn release_all(&self) -> Result<(), LeaseError> {
        let mut first_failure = None;
        for lease in self.leases.iter().rev() {
            if let Err(err) = lease.release()
                && first_failure.is_none()
            {
                first_failure = Some(err);
            }
        }
        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for LeaseSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseSet")
            .field("leases", &self.leases.iter().map(|l| l.name()).collect::<Vec<_>>())
            .finish()
    }
}
