//! Deferred evaluation of remote scalar expressions.
//!
//! Every phase of the pipeline collects its independent scalar needs here and
//! resolves them with one backend round trip. Resolving inside a per-month or
//! per-zone loop would still be correct but turns O(1) network calls into
//! O(months × zones), so by construction handles can only be redeemed against
//! the batch that resolved them.

use detection_core::{DetectionError, RasterBackend, ScalarExpr};

/// Position of a submitted expression within the current batch. Valid only
/// for the `ResolvedBatch` produced by the next `resolve_all` call.
#[derive(Debug, Clone, Copy)]
pub struct EvalHandle(usize);

pub struct BatchResolver<'a> {
    backend: &'a dyn RasterBackend,
    pending: Vec<ScalarExpr>,
}

impl<'a> BatchResolver<'a> {
    pub fn new(backend: &'a dyn RasterBackend) -> Self {
        Self {
            backend,
            pending: Vec::new(),
        }
    }

    /// Queue an expression. No network cost.
    pub fn submit(&mut self, expr: ScalarExpr) -> EvalHandle {
        self.pending.push(expr);
        EvalHandle(self.pending.len() - 1)
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Resolve everything submitted since the last call in a single round
    /// trip. Values correspond index-for-index with submission order. The
    /// resolver is reusable afterwards for the next phase.
    pub async fn resolve_all(&mut self) -> Result<ResolvedBatch, DetectionError> {
        let exprs = std::mem::take(&mut self.pending);
        if exprs.is_empty() {
            return Ok(ResolvedBatch { values: Vec::new() });
        }

        tracing::debug!("Resolving batch of {} deferred expressions", exprs.len());
        let values = self.backend.evaluate(&exprs).await?;
        Ok(ResolvedBatch { values })
    }
}

/// Results of one `resolve_all` call. `None` entries are null reductions.
pub struct ResolvedBatch {
    values: Vec<Option<f64>>,
}

impl ResolvedBatch {
    pub fn get(&self, handle: EvalHandle) -> Option<f64> {
        self.values.get(handle.0).copied().flatten()
    }

    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
