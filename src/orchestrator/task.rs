use super::action::ActionRef;

/// Named setup step with ordered dependencies.
///
/// The "executed" flag is owned by the [`Orchestrator`](super::Orchestrator),
/// not by the task, so one `Task` value stays immutable once registered.
#[derive(Clone)]
pub struct Task {
    pub(crate) id: String,
    pub(crate) deps: Vec<String>,
    pub(crate) action: ActionRef,
}

impl Task {
    pub fn new(id: impl Into<String>, action: ActionRef) -> Self {
        Self {
            id: id.into(),
            deps: Vec::new(),
            action,
        }
    }

    /// Appends dependencies, in order; repeated identifiers are kept once.
    pub fn with_deps<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for dep in deps {
            let dep = dep.into();
            if !self.deps.contains(&dep) {
                self.deps.push(dep);
            }
        }
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn deps(&self) -> &[String] {
        &self.deps
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("deps", &self.deps)
            .finish_non_exhaustive()
    }
}
