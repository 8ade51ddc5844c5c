//! Hit-test query stack for GPU picking
//!
//! The engine brackets pickable geometry with `push`/`pop` calls carrying an
//! opaque payload. Each push snapshots the whole live stack as a query and
//! tags everything drawn afterwards with `query index + 1` in the hit target.
//! At the end of the frame the largest tag under the pick region, minus one,
//! selects the payload to return.

/// A recorded query: a byte range of the payload buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitQuery {
    /// Offset into the payload buffer
    pub start: usize,
    /// Length in bytes
    pub count: usize,
}

/// Nested pick regions for one frame
#[derive(Debug, Default)]
pub struct HitTestQueryStack {
    stack: Vec<u8>,
    queries: Vec<HitQuery>,
    buffer: Vec<u8>,
    hit_index: u32,
    forced_index: Option<usize>,
}

impl HitTestQueryStack {
    /// Create an empty stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the per-frame indices at the start of a frame
    pub fn begin_frame(&mut self) {
        self.hit_index = 0;
        self.forced_index = None;
    }

    /// Value written into the hit target by subsequent geometry
    pub fn hit_index(&self) -> u32 {
        self.hit_index
    }

    /// Recorded queries
    pub fn queries(&self) -> &[HitQuery] {
        &self.queries
    }

    /// Bytes currently on the live stack
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Push a payload and record the new stack as a query
    ///
    /// Empty payloads are ignored. Pending geometry must be flushed before
    /// this call so it keeps the previous tag. Returns `true` when a query
    /// was recorded.
    pub fn push(&mut self, data: &[u8]) -> bool {
        if data.is_empty() {
            return false;
        }
        self.stack.extend_from_slice(data);

        let index = self.queries.len();
        self.snapshot();
        self.hit_index = index as u32 + 1;
        log::trace!("[HIT] Push {} bytes, hit index {}", data.len(), self.hit_index);
        true
    }

    /// Pop `count` bytes off the live stack
    ///
    /// With `force`, the stack is first recorded as a query that wins the
    /// resolve whenever nothing later was hit.
    pub fn pop(&mut self, count: usize, force: bool) {
        if force {
            self.forced_index = Some(self.queries.len());
            self.snapshot();
        }
        let keep = self.stack.len().saturating_sub(count);
        self.stack.truncate(keep);
    }

    fn snapshot(&mut self) {
        self.queries.push(HitQuery {
            start: self.buffer.len(),
            count: self.stack.len(),
        });
        self.buffer.extend_from_slice(&self.stack);
    }

    /// Payload for the largest hit target value in a region
    ///
    /// Out-of-range results give `None`.
    pub fn resolve(&self, max_value: u32) -> Option<Vec<u8>> {
        let mut hit = i64::from(max_value) - 1;
        if let Some(forced) = self.forced_index {
            hit = hit.max(forced as i64);
        }

        let query = usize::try_from(hit).ok().and_then(|i| self.queries.get(i))?;
        self.buffer
            .get(query.start..query.start + query.count)
            .map(<[u8]>::to_vec)
    }

    /// Drop every query and payload at the end of a frame
    pub fn clear(&mut self) {
        self.stack.clear();
        self.queries.clear();
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_push_is_ignored() {
        let mut hits = HitTestQueryStack::new();
        assert!(!hits.push(&[]));
        assert!(hits.queries().is_empty());
        assert_eq!(hits.hit_index(), 0);
    }

    #[test]
    fn test_nested_pushes_record_concatenated_stack() {
        let mut hits = HitTestQueryStack::new();
        hits.push(b"R1");
        assert_eq!(hits.hit_index(), 1);
        hits.push(b"R2");
        assert_eq!(hits.hit_index(), 2);
        hits.pop(2, false);
        hits.pop(2, false);

        assert_eq!(hits.depth(), 0);
        assert_eq!(hits.resolve(2).unwrap(), b"R1R2".to_vec());
        assert_eq!(hits.resolve(1).unwrap(), b"R1".to_vec());
        assert_eq!(hits.resolve(0), None);
        assert_eq!(hits.resolve(9), None);
    }

    #[test]
    fn test_forced_pop_wins_over_earlier_hits() {
        let mut hits = HitTestQueryStack::new();
        hits.push(b"A");
        hits.pop(1, false);
        hits.push(b"B");
        hits.pop(1, true);

        assert_eq!(hits.queries().len(), 3);
        assert_eq!(hits.resolve(0).unwrap(), b"B".to_vec());
        assert_eq!(hits.resolve(1).unwrap(), b"B".to_vec());
    }

    #[test]
    fn test_oversized_pop_saturates() {
        let mut hits = HitTestQueryStack::new();
        hits.push(b"xy");
        hits.pop(10, false);
        assert_eq!(hits.depth(), 0);
    }

    #[test]
    fn test_frame_reset() {
        let mut hits = HitTestQueryStack::new();
        hits.push(b"A");
        hits.pop(1, true);
        hits.clear();
        hits.begin_frame();

        assert_eq!(hits.hit_index(), 0);
        assert_eq!(hits.resolve(1), None);
    }
}
