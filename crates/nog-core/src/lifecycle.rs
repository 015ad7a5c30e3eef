//! The dirty / posted / lazy lifecycle shared by commits, trees, and
//! objects. `Entry<T>` owns its content directly rather than returning
//! defensive copies on every access -- Rust's ownership rules already give
//! callers the guarantee the original client achieved by deep-copying in
//! and out of its cache.

use crate::hash::Sha1;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Hydration<T> {
    /// Referenced by sha1 but content has not been fetched yet.
    Lazy,
    Loaded(T),
}

#[derive(Debug, Clone)]
pub struct Entry<T> {
    sha1: Option<Sha1>,
    repo: Option<String>,
    hydration: Hydration<T>,
}

impl<T> Entry<T> {
    /// A freshly constructed entry: no sha1 yet ("dirty").
    pub fn new(content: T) -> Self {
        Entry {
            sha1: None,
            repo: None,
            hydration: Hydration::Loaded(content),
        }
    }

    /// An entry referenced only by its sha1; content loads on first access.
    pub fn lazy(sha1: Sha1) -> Self {
        Entry {
            sha1: Some(sha1),
            repo: None,
            hydration: Hydration::Lazy,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.sha1.is_none()
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self.hydration, Hydration::Lazy)
    }

    pub fn sha1(&self) -> Option<Sha1> {
        self.sha1
    }

    pub fn repo(&self) -> Option<&str> {
        self.repo.as_deref()
    }

    /// Sets the owning repo. Callers retarget freshly staged (not yet
    /// posted) entries to the stream's repo as soon as they're enqueued;
    /// already-posted entries keep their original repo so a retried flush
    /// can still emit a correct cross-repo copy marker.
    pub fn set_repo(&mut self, repo: impl Into<String>) {
        self.repo = Some(repo.into());
    }

    pub fn content(&self) -> Option<&T> {
        match &self.hydration {
            Hydration::Loaded(c) => Some(c),
            Hydration::Lazy => None,
        }
    }

    pub fn content_mut_for_mutation(&mut self) -> Option<&mut T> {
        match &mut self.hydration {
            Hydration::Loaded(c) => {
                self.sha1 = None;
                Some(c)
            }
            Hydration::Lazy => None,
        }
    }

    /// Fills in content for a lazy entry once it has been fetched. Leaves
    /// the sha1 untouched -- hydrating is not a mutation.
    pub fn hydrate(&mut self, content: T) {
        self.hydration = Hydration::Loaded(content);
    }

    /// Records that the remote has accepted this content under `sha1`.
    pub fn mark_posted(&mut self, sha1: Sha1) {
        self.sha1 = Some(sha1);
    }
}
