use std::fmt;

use crate::store::StoreError;

#[derive(thiserror::Error, Debug)]
pub enum ReconcileError {
    #[error("failed to {context}: {source}")]
    Store {
        context: String,
        #[source]
        source: StoreError,
    },
    #[error("cluster configuration incomplete: {0}")]
    ConfigurationIncomplete(String),
    #[error("load balancer service {0} is still being released")]
    LoadBalancerPending(String),
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

impl ReconcileError {
    pub fn store(context: impl Into<String>, source: StoreError) -> Self {
        ReconcileError::Store {
            context: context.into(),
            source,
        }
    }

    /// Number of leaf causes carried by this error.
    pub fn cause_count(&self) -> usize {
        match self {
            ReconcileError::Aggregate(agg) => {
                agg.errors.iter().map(ReconcileError::cause_count).sum()
            }
            _ => 1,
        }
    }
}

/// Ordered collection of step failures for one reconciliation pass.
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<ReconcileError>,
}

impl AggregateError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: ReconcileError) {
        self.errors.push(err);
    }

    /// Keep the error of `res`, if any, and hand back its value.
    pub fn collect<T>(&mut self, res: Result<T, ReconcileError>) -> Option<T> {
        match res {
            Ok(v) => Some(v),
            Err(e) => {
                self.push(e);
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[ReconcileError] {
        &self.errors
    }

    /// `Ok` only when nothing was collected. A single error is returned as is.
    pub fn into_result(mut self) -> Result<(), ReconcileError> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(ReconcileError::Aggregate(self)),
        }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.len() == 1 {
            return write!(f, "{}", self.errors[0]);
        }
        write!(f, "[")?;
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", e)?;
        }
        write!(f, "]")
    }
}

impl std::error::Error for AggregateError {}
