/// Stack of decode targets.
///
/// The bottom frame is the top-level result and can never be popped. A
/// nested decode pushes the structure it fills, reads into
/// [`ContextStack::current_mut`], and pops it when complete so the caller can
/// attach it to the enclosing frame. Each in-flight response decode owns its
/// own stack.
#[derive(Debug)]
pub struct ContextStack<F> {
    root: F,
    nested: Vec<F>,
}

impl<F> ContextStack<F> {
    pub fn new(root: F) -> Self {
        Self {
            root,
            nested: Vec::new(),
        }
    }

    pub fn push(&mut self, frame: F) {
        self.nested.push(frame);
    }

    /// Pop the innermost nested frame. Returns `None` at the root.
    pub fn pop(&mut self) -> Option<F> {
        self.nested.pop()
    }

    pub fn current(&self) -> &F {
        self.nested.last().unwrap_or(&self.root)
    }

    pub fn current_mut(&mut self) -> &mut F {
        self.nested.last_mut().unwrap_or(&mut self.root)
    }

    pub fn root_mut(&mut self) -> &mut F {
        &mut self.root
    }

    /// Number of frames including the root.
    pub fn depth(&self) -> usize {
        self.nested.len() + 1
    }

    pub fn into_root(self) -> F {
        debug_assert!(self.nested.is_empty(), "unbalanced context stack");
        self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_redirects_and_pop_restores() {
        let mut stack = ContextStack::new(vec![1]);
        stack.push(vec![]);
        stack.current_mut().push(2);
        assert_eq!(stack.depth(), 2);

        let inner = stack.pop().unwrap();
        assert_eq!(inner, vec![2]);
        assert_eq!(stack.current(), &vec![1]);
        assert!(stack.pop().is_none());
        assert_eq!(stack.into_root(), vec![1]);
    }
}
