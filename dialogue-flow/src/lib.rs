pub mod context;
pub mod engine;
pub mod error;
pub mod guard;
pub mod postgres;
pub mod step;
pub mod storage;

// Re-export commonly used types
pub use context::Context;
pub use engine::{DialogueEngine, EntryRouter, StepKey, TurnOutcome, TurnStatus};
pub use error::{FlowError, Result};
pub use guard::SessionGuard;
pub use postgres::PostgresSessionStorage;
pub use step::{StepHandler, StepOutcome, StepResult};
pub use storage::{DialogueSession, InMemorySessionStorage, SessionStorage};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    enum TestStep {
        Ask,
        Check,
        Done,
    }

    impl StepKey for TestStep {
        fn is_wait_point(&self) -> bool {
            !matches!(self, TestStep::Check)
        }

        fn recovery_point(&self) -> Self {
            match self {
                TestStep::Check => TestStep::Ask,
                other => *other,
            }
        }
    }

    struct Router;

    impl EntryRouter<TestStep> for Router {
        fn entry_step(&self, persisted: Option<TestStep>, _context: &Context) -> TestStep {
            persisted.unwrap_or(TestStep::Ask)
        }
    }

    struct AskStep;

    #[async_trait]
    impl StepHandler<TestStep> for AskStep {
        fn step(&self) -> TestStep {
            TestStep::Ask
        }

        async fn run(&self, context: Context) -> Result<StepResult<TestStep>> {
            match context.get::<String>("value").await {
                Some(_) => Ok(StepResult::new(None, StepOutcome::Chain(TestStep::Check))),
                None => Ok(StepResult::new(
                    Some("What is the value?".to_string()),
                    StepOutcome::Wait,
                )),
            }
        }
    }

    struct CheckStep;

    #[async_trait]
    impl StepHandler<TestStep> for CheckStep {
        fn step(&self) -> TestStep {
            TestStep::Check
        }

        async fn run(&self, context: Context) -> Result<StepResult<TestStep>> {
            let value: String = context
                .get("value")
                .await
                .ok_or_else(|| FlowError::ContextError("value not found".to_string()))?;
            context.set("checked", format!("ok:{value}")).await;
            Ok(StepResult::new(None, StepOutcome::Chain(TestStep::Done)))
        }
    }

    struct DoneStep;

    #[async_trait]
    impl StepHandler<TestStep> for DoneStep {
        fn step(&self) -> TestStep {
            TestStep::Done
        }

        async fn run(&self, _context: Context) -> Result<StepResult<TestStep>> {
            Ok(StepResult::new(
                Some("All done".to_string()),
                StepOutcome::Complete,
            ))
        }
    }

    fn engine() -> DialogueEngine<TestStep> {
        DialogueEngine::new(Arc::new(Router))
            .register(Arc::new(AskStep))
            .register(Arc::new(CheckStep))
            .register(Arc::new(DoneStep))
    }

    #[tokio::test]
    async fn test_wait_then_chain_to_completion() {
        let engine = engine();
        let mut session = DialogueSession::new("session1");

        let outcome = engine.run_turn(&mut session).await.unwrap();
        assert_eq!(outcome.status, TurnStatus::WaitingForInput);
        assert_eq!(outcome.messages, vec!["What is the value?".to_string()]);
        assert_eq!(session.current_step, Some(TestStep::Ask));

        session.context.set("value", "42").await;
        let outcome = engine.run_turn(&mut session).await.unwrap();
        assert_eq!(outcome.status, TurnStatus::Completed);
        assert_eq!(outcome.messages, vec!["All done".to_string()]);
        // The chained internal step ran and left its mark
        let checked: String = session.context.get("checked").await.unwrap();
        assert_eq!(checked, "ok:42");
        // Completed turns still persist a wait point
        assert!(session.current_step.unwrap().is_wait_point());
    }

    #[tokio::test]
    async fn test_recovery_from_persisted_internal_step() {
        let engine = engine();
        let mut session = DialogueSession::new("session1");
        // Simulate a crash that left an internal-only step persisted
        session.current_step = Some(TestStep::Check);

        let outcome = engine.run_turn(&mut session).await.unwrap();
        // Recovered to Ask, which waits for input
        assert_eq!(outcome.status, TurnStatus::WaitingForInput);
        assert_eq!(session.current_step, Some(TestStep::Ask));
    }

    #[tokio::test]
    async fn test_chain_limit_guards_against_cycles() {
        struct LoopStep;

        #[async_trait]
        impl StepHandler<TestStep> for LoopStep {
            fn step(&self) -> TestStep {
                TestStep::Ask
            }

            async fn run(&self, _context: Context) -> Result<StepResult<TestStep>> {
                Ok(StepResult::new(None, StepOutcome::Chain(TestStep::Ask)))
            }
        }

        let engine = DialogueEngine::new(Arc::new(Router)).register(Arc::new(LoopStep));
        let mut session = DialogueSession::new("session1");

        let err = engine.run_turn(&mut session).await.unwrap_err();
        assert!(matches!(err, FlowError::ChainLimitExceeded(_)));
    }

    #[tokio::test]
    async fn test_session_storage_roundtrip() {
        let storage: InMemorySessionStorage<TestStep> = InMemorySessionStorage::new();

        let session: DialogueSession<TestStep> = DialogueSession::new("session1");
        session.context.set("value", "hello").await;
        storage.save(session).await.unwrap();

        let loaded = storage.load("session1").await.unwrap().unwrap();
        let value: String = loaded.context.get("value").await.unwrap();
        assert_eq!(value, "hello");

        storage.delete("session1").await.unwrap();
        assert!(storage.load("session1").await.unwrap().is_none());
        // Deleting again is a no-op
        storage.delete("session1").await.unwrap();
    }

    #[tokio::test]
    async fn test_session_serde_preserves_step_and_context() {
        let mut session: DialogueSession<TestStep> = DialogueSession::new("session1");
        session.current_step = Some(TestStep::Done);
        session.context.set("value", "persisted").await;

        let json = serde_json::to_value(&session).unwrap();
        let restored: DialogueSession<TestStep> = serde_json::from_value(json).unwrap();

        assert_eq!(restored.id, "session1");
        assert_eq!(restored.current_step, Some(TestStep::Done));
        let value: String = restored.context.get("value").await.unwrap();
        assert_eq!(value, "persisted");
    }

    #[tokio::test]
    async fn test_guard_serializes_same_session() {
        let guard = Arc::new(SessionGuard::new());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let guard = guard.clone();
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _lock = guard.acquire("session1").await;
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
