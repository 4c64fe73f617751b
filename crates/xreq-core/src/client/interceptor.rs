use anyhow::Result;
use std::sync::Arc;

/// One transform stage.
pub type Interceptor<T> = Arc<dyn Fn(T) -> Result<T> + Send + Sync>;

/// Ordered transform stages applied left to right. A stage that fails is
/// logged and skipped; the value it was given passes on unchanged.
///
/// Clones share the stages, so a clone is a cheap snapshot that can run
/// without holding whatever lock guards the original.
pub struct InterceptorChain<T> {
    stages: Vec<Interceptor<T>>,
}

impl<T> Clone for InterceptorChain<T> {
    fn clone(&self) -> Self {
        Self {
            stages: self.stages.clone(),
        }
    }
}

impl<T> Default for InterceptorChain<T> {
    fn default() -> Self {
        Self { stages: Vec::new() }
    }
}

impl<T> std::fmt::Debug for InterceptorChain<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("stages", &self.stages.len())
            .finish()
    }
}

impl<T: Clone> InterceptorChain<T> {
    /// Always accepted: only callables can be passed.
    pub fn add(&mut self, stage: impl Fn(T) -> Result<T> + Send + Sync + 'static) -> bool {
        self.stages.push(Arc::new(stage));
        true
    }

    pub fn apply(&self, value: T) -> T {
        self.stages
            .iter()
            .enumerate()
            .fold(value, |value, (i, stage)| match stage(value.clone()) {
                Ok(next) => next,
                Err(e) => {
                    tracing::warn!(stage = i, "interceptor failed: {:#}", e);
                    value
                }
            })
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_run_in_order() {
        let mut chain = InterceptorChain::<String>::default();
        chain.add(|s| Ok(s + "a"));
        chain.add(|s| Ok(s + "b"));
        assert_eq!(chain.apply(String::new()), "ab");
    }

    #[test]
    fn failing_stage_is_bypassed() {
        let mut chain = InterceptorChain::<i32>::default();
        chain.add(|n| Ok(n + 1));
        chain.add(|_| anyhow::bail!("boom"));
        chain.add(|n| Ok(n * 10));
        assert_eq!(chain.apply(1), 20);
        assert_eq!(chain.len(), 3);
    }

    #[test]
    fn clone_is_a_snapshot() {
        let mut chain = InterceptorChain::<i32>::default();
        chain.add(|n| Ok(n + 1));
        let snapshot = chain.clone();
        chain.add(|n| Ok(n * 10));
        assert_eq!(snapshot.apply(1), 2);
        assert_eq!(chain.apply(1), 20);
    }
}
