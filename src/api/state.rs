use crate::dispatch::Dispatcher;
use crate::logbuf::LogStore;
use crate::storage::{ProjectStore, RunStore};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub projects: ProjectStore,
    pub runs: RunStore,
    pub logs: Arc<dyn LogStore>,
    pub dispatcher: Dispatcher,
}
