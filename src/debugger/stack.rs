use super::host::StackInspector;

/// An environment handle stamped with the stop it was captured at.
#[derive(Debug, Clone)]
pub struct EnvHandle<E> {
    generation: u64,
    env: E,
}

impl<E> EnvHandle<E> {
    /// The handle's environment, if it belongs to stop `generation`.
    pub fn get(&self, generation: u64) -> Option<&E> {
        (self.generation == generation).then_some(&self.env)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug, Clone)]
pub struct StackFrame<E> {
    pub display_name: String,
    pub env: EnvHandle<E>,
}

/// Snapshots the interpreter's call stack, innermost frame first, tagging
/// every handle with `generation`.
pub fn capture<E>(stack: &dyn StackInspector<E>, generation: u64) -> Vec<StackFrame<E>> {
    stack
        .frames()
        .into_iter()
        .map(|frame| StackFrame {
            display_name: frame.name,
            env: EnvHandle {
                generation,
                env: frame.env,
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debugger::host::RawFrame;

    struct TwoFrames;

    impl StackInspector<u32> for TwoFrames {
        fn frames(&self) -> Vec<RawFrame<u32>> {
            vec![
                RawFrame {
                    name: "inner".into(),
                    env: 2,
                },
                RawFrame {
                    name: "outer".into(),
                    env: 1,
                },
            ]
        }
    }

    #[test]
    fn keeps_reported_order_and_tags_generation() {
        let frames = capture(&TwoFrames, 7);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].display_name, "inner");
        assert_eq!(frames[0].env.get(7), Some(&2));
        assert_eq!(frames[1].env.generation(), 7);
    }

    #[test]
    fn stale_handles_are_rejected() {
        let frames = capture(&TwoFrames, 3);
        assert_eq!(frames[0].env.get(4), None);
    }
}
