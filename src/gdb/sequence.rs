//! Ordered execution of asynchronous steps
//!
//! A [`Sequence`] runs its steps strictly one after another. The first
//! failing step ends the run, and a [`CancellationToken`] is checked before
//! each step starts.

use crate::gdb::error::{GdbError, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One named unit of work over a shared context `C`
#[async_trait]
pub trait Step<C: Send>: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, ctx: &mut C) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceState {
    Pending,
    Running { index: usize, step: String },
    Completed,
    Failed { step: String },
    Cancelled { step: String },
}

impl SequenceState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SequenceState::Completed | SequenceState::Failed { .. } | SequenceState::Cancelled { .. }
        )
    }
}

pub struct Sequence<C: Send> {
    steps: Vec<Box<dyn Step<C>>>,
    state: SequenceState,
}

impl<C: Send> Sequence<C> {
    pub fn new(steps: Vec<Box<dyn Step<C>>>) -> Self {
        Self {
            steps,
            state: SequenceState::Pending,
        }
    }

    pub fn state(&self) -> &SequenceState {
        &self.state
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Drive every step in order. Runs at most once.
    pub async fn run(&mut self, ctx: &mut C, cancel: &CancellationToken) -> Result<()> {
        if self.state != SequenceState::Pending {
            return Err(GdbError::Config(format!(
                "sequence already ran ({:?})",
                self.state
            )));
        }

        let total = self.steps.len();
        for (index, step) in self.steps.iter().enumerate() {
            let name = step.name().to_string();
            if cancel.is_cancelled() {
                info!("Sequence cancelled before step '{}'", name);
                self.state = SequenceState::Cancelled { step: name.clone() };
                return Err(GdbError::SequenceCancelled { step: name });
            }

            self.state = SequenceState::Running {
                index,
                step: name.clone(),
            };
            debug!("Step {}/{}: {}", index + 1, total, name);

            if let Err(e) = step.execute(ctx).await {
                warn!("Step '{}' failed: {}", name, e);
                self.state = SequenceState::Failed { step: name.clone() };
                return Err(GdbError::Sequence {
                    step: name,
                    source: Box::new(e),
                });
            }
        }

        self.state = SequenceState::Completed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[derive(Default)]
    struct Trace {
        ran: Vec<String>,
    }

    struct Record {
        name: &'static str,
        fail: bool,
        cancel_after: Option<CancellationToken>,
    }

    impl Record {
        fn ok(name: &'static str) -> Box<dyn Step<Trace>> {
            Box::new(Record {
                name,
                fail: false,
                cancel_after: None,
            })
        }

        fn failing(name: &'static str) -> Box<dyn Step<Trace>> {
            Box::new(Record {
                name,
                fail: true,
                cancel_after: None,
            })
        }
    }

    #[async_trait]
    impl Step<Trace> for Record {
        fn name(&self) -> &str {
            self.name
        }

        async fn execute(&self, ctx: &mut Trace) -> Result<()> {
            tokio::task::yield_now().await;
            ctx.ran.push(self.name.to_string());
            if let Some(token) = &self.cancel_after {
                token.cancel();
            }
            if self.fail {
                Err(GdbError::Protocol {
                    command: "-break-insert".to_string(),
                    message: "No symbol table is loaded.".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_runs_all_steps_in_order() {
        let mut sequence = Sequence::new(vec![Record::ok("a"), Record::ok("b"), Record::ok("c")]);
        let mut trace = Trace::default();
        assert_ok!(sequence.run(&mut trace, &CancellationToken::new()).await);
        assert_eq!(trace.ran, vec!["a", "b", "c"]);
        assert_eq!(sequence.state(), &SequenceState::Completed);
    }

    #[tokio::test]
    async fn test_failure_stops_remaining_steps() {
        let mut sequence = Sequence::new(vec![
            Record::ok("A"),
            Record::failing("B"),
            Record::ok("C"),
        ]);
        let mut trace = Trace::default();
        let err = sequence
            .run(&mut trace, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(trace.ran, vec!["A", "B"]);
        match &err {
            GdbError::Sequence { step, source } => {
                assert_eq!(step, "B");
                assert!(matches!(**source, GdbError::Protocol { .. }));
            }
            other => panic!("Expected sequence error, got {:?}", other),
        }
        assert_eq!(
            sequence.state(),
            &SequenceState::Failed {
                step: "B".to_string()
            }
        );

        // a second run does not re-execute anything
        assert!(sequence.run(&mut trace, &CancellationToken::new()).await.is_err());
        assert_eq!(trace.ran.len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_between_steps() {
        let cancel = CancellationToken::new();
        let mut sequence = Sequence::new(vec![
            Box::new(Record {
                name: "first",
                fail: false,
                cancel_after: Some(cancel.clone()),
            }) as Box<dyn Step<Trace>>,
            Record::ok("second"),
        ]);
        let mut trace = Trace::default();
        let err = sequence.run(&mut trace, &cancel).await.unwrap_err();
        assert_eq!(
            err,
            GdbError::SequenceCancelled {
                step: "second".to_string()
            }
        );
        assert_eq!(trace.ran, vec!["first"]);
        assert!(sequence.state().is_terminal());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut sequence = Sequence::new(vec![Record::ok("only")]);
        let mut trace = Trace::default();
        assert!(sequence.run(&mut trace, &cancel).await.is_err());
        assert!(trace.ran.is_empty());
    }
}
