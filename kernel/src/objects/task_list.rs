//! Intrusive FIFO of tasks
//!
//! Ready queues and endpoint wait queues share this list. The list holds only
//! head, tail and length; the links live in each [`Task`] (`ready_links` or
//! `wait_links`, selected by [`Link`]), so a task can be on one ready queue
//! and one wait queue without allocation. Removal from the middle patches
//! both neighbours or the head/tail.
//!
//! Callers must hold the lock guarding the list.

use super::{Task, TaskId};
use super::task::QueueLinks;

/// Which pair of links in a task a list threads through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    Ready,
    Wait,
}

#[inline]
fn links(tasks: &mut [Task], link: Link, id: TaskId) -> &mut QueueLinks {
    let task = &mut tasks[id.index() as usize];
    match link {
        Link::Ready => &mut task.ready_links,
        Link::Wait => &mut task.wait_links,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskList {
    head: Option<TaskId>,
    tail: Option<TaskId>,
    len: usize,
}

impl TaskList {
    pub const fn new() -> Self {
        Self { head: None, tail: None, len: 0 }
    }

    #[inline]
    pub fn head(&self) -> Option<TaskId> {
        self.head
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Append `id`. Panics if it is already on a list of this kind.
    pub fn push_back(&mut self, tasks: &mut [Task], link: Link, id: TaskId) {
        let tail = self.tail;
        let node = links(tasks, link, id);
        assert!(!node.queued, "task {:?} already queued", id);
        *node = QueueLinks { prev: tail, next: None, queued: true };
        match tail {
            Some(tail) => links(tasks, link, tail).next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.len += 1;
        log::trace!("queue {:?}: push {:?} (len {})", link, id, self.len);
    }

    pub fn pop_front(&mut self, tasks: &mut [Task], link: Link) -> Option<TaskId> {
        let head = self.head?;
        self.remove(tasks, link, head);
        Some(head)
    }

    /// Unlink `id` from anywhere in the list
    ///
    /// Panics if `id` is not queued: a caller that believes otherwise has
    /// lost track of queue membership.
    pub fn remove(&mut self, tasks: &mut [Task], link: Link, id: TaskId) {
        let node = *links(tasks, link, id);
        assert!(node.queued, "task {:?} is not queued", id);
        match node.prev {
            Some(prev) => links(tasks, link, prev).next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => links(tasks, link, next).prev = node.prev,
            None => self.tail = node.prev,
        }
        *links(tasks, link, id) = QueueLinks::default();
        self.len -= 1;
        log::trace!("queue {:?}: remove {:?} (len {})", link, id, self.len);
    }

    pub fn contains(&self, tasks: &[Task], link: Link, id: TaskId) -> bool {
        self.iter(tasks, link).any(|t| t == id)
    }

    /// Iterate from head to tail
    pub fn iter<'a>(&self, tasks: &'a [Task], link: Link) -> impl Iterator<Item = TaskId> + 'a {
        let mut cursor = self.head;
        core::iter::from_fn(move || {
            let id = cursor?;
            let task = &tasks[id.index() as usize];
            cursor = match link {
                Link::Ready => task.ready_links.next,
                Link::Wait => task.wait_links.next,
            };
            Some(id)
        })
    }
}
