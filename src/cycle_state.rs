use std::{
    any::Any,
    collections::{HashMap, HashSet},
};

/// Keyed storage shared by the plugins of one scheduling cycle.
///
/// A pre-score phase writes its state once; the score phases that follow only
/// read. The storage is dropped with the cycle.
#[derive(Default)]
pub struct CycleState {
    storage: HashMap<String, Box<dyn Any + Send + Sync>>,
    skip_score_plugins: HashSet<String>,
}

impl CycleState {
    pub fn skip_score_plugins(&self) -> &HashSet<String> {
        &self.skip_score_plugins
    }

    pub fn skip_score_plugin(&mut self, name: &str) {
        self.skip_score_plugins.insert(name.to_string());
    }

    pub fn read<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.storage.get(key).and_then(|v| v.downcast_ref())
    }

    pub fn write(&mut self, key: &str, value: Box<dyn Any + Send + Sync>) {
        self.storage.insert(key.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_back_written_value() {
        let mut state = CycleState::default();
        state.write("counters", Box::new(vec![1_i64, 2, 3]));
        let read = state.read::<Vec<i64>>("counters");
        assert_eq!(read, Some(&vec![1, 2, 3]));
    }

    #[test]
    fn test_read_wrong_type_or_missing_key() {
        let mut state = CycleState::default();
        state.write("counters", Box::new(7_i64));
        assert!(state.read::<String>("counters").is_none());
        assert!(state.read::<i64>("absent").is_none());
    }
}
