use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// At most one generation run may be active per course id. The editor and
/// readers may look at the record while a run writes it, but a second run
/// would interleave checkpoints, so it is refused up front.
#[derive(Debug, Default, Clone)]
pub struct RunLocks {
    active: Arc<Mutex<HashSet<String>>>,
}

impl RunLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the run slot for a course. Returns `None` while another run
    /// holds it; the returned guard releases the slot on drop.
    pub fn try_acquire(&self, course_id: &str) -> Option<RunLockGuard> {
        let mut active = self.active.lock().expect("run lock mutex poisoned");
        if !active.insert(course_id.to_string()) {
            return None;
        }
        Some(RunLockGuard {
            locks: Arc::clone(&self.active),
            course_id: course_id.to_string(),
        })
    }
}

#[derive(Debug)]
pub struct RunLockGuard {
    locks: Arc<Mutex<HashSet<String>>>,
    course_id: String,
}

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        let mut active = match self.locks.lock() {
            Ok(active) => active,
            Err(poisoned) => poisoned.into_inner(),
        };
        active.remove(&self.course_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_refused_until_release() {
        let locks = RunLocks::new();
        let guard = locks.try_acquire("c1").expect("first acquire");
        assert!(locks.try_acquire("c1").is_none());
        drop(guard);
        assert!(locks.try_acquire("c1").is_some());
    }

    #[test]
    fn different_courses_do_not_contend() {
        let locks = RunLocks::new();
        let _a = locks.try_acquire("c1").expect("first course");
        assert!(locks.try_acquire("c2").is_some());
    }

    #[test]
    fn clones_share_the_same_slots() {
        let locks = RunLocks::new();
        let clone = locks.clone();
        let _guard = locks.try_acquire("c1").expect("acquire");
        assert!(clone.try_acquire("c1").is_none());
    }
}
