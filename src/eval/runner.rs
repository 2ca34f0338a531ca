//! Runs a batch of [`EvalTask`]s against one target/judge pair, sequentially or under a
//! bounded concurrency limit via a `tokio::sync::Semaphore` rather than a thread pool.

use super::judge::Judge;
use super::target::Target;
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub struct EvalTask {
    pub name: String,
    pub input: String,
    pub expected_output: Option<String>,
}

impl EvalTask {
    pub fn new(name: impl Into<String>, input: impl Into<String>, expected_output: Option<String>) -> Self {
        Self {
            name: name.into(),
            input: input.into(),
            expected_output,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EvalResult {
    pub task_name: String,
    pub score: super::judge::Score,
}

/// Runs `tasks` against freshly-built targets (one per task, via `target_factory`, since
/// a [`Target`] like `AgentTarget` owns mutable per-run state that can't be shared
/// across concurrent executions) scored by a single shared `judge`.
pub struct EvalRunner {
    judge: Arc<dyn Judge>,
    max_concurrency: usize,
}

impl EvalRunner {
    pub fn new(judge: Arc<dyn Judge>) -> Self {
        Self {
            judge,
            max_concurrency: 1,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub async fn run<F, T>(&self, tasks: Vec<EvalTask>, target_factory: F) -> Vec<EvalResult>
    where
        F: Fn() -> T + Send + Sync,
        T: Target + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let futures = tasks.into_iter().map(|task| {
            let semaphore = semaphore.clone();
            let judge = self.judge.clone();
            let mut target = target_factory();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore is never closed");
                let trajectory = target.run(&task.input).await;
                let score = judge.score(task.expected_output.as_deref(), trajectory).await;
                EvalResult {
                    task_name: task.name,
                    score,
                }
            }
        });
        futures_util::future::join_all(futures).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockClient;
    use crate::eval::judge::{ContainsJudge, Extractor};
    use crate::eval::target::ModelTarget;

    #[tokio::test]
    async fn runs_every_task_and_scores_it() {
        let runner = EvalRunner::new(Arc::new(ContainsJudge::new(Extractor::LastContent))).with_max_concurrency(4);
        let tasks = vec![
            EvalTask::new("t1", "compute", Some("18844".to_string())),
            EvalTask::new("t2", "compute", Some("nope".to_string())),
        ];
        let results = runner.run(tasks, || ModelTarget::new(Arc::new(MockClient::new("m", "answer: 18844209")))).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results.iter().find(|r| r.task_name == "t1").unwrap().score.overall, 10.0);
        assert_eq!(results.iter().find(|r| r.task_name == "t2").unwrap().score.overall, 0.0);
    }
}
