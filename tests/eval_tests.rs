//! Integration coverage for the evaluation harness: a target producing a trajectory, a
//! judge scoring it, and the runner batching many tasks under bounded concurrency.

use agentloom::client::MockClient;
use agentloom::eval::judge::{CompositeJudge, ContainsJudge, Extractor, FuzzyMatchJudge, Judge};
use agentloom::eval::runner::{EvalRunner, EvalTask};
use agentloom::eval::target::{ModelTarget, Target};
use agentloom::tool::ToolRegistry;
use agentloom::Agent;
use std::sync::Arc;

#[tokio::test]
async fn model_target_produces_a_scored_trajectory_via_contains_judge() {
    let target = ModelTarget::new(Arc::new(MockClient::new("mock", "the answer is 42")));
    let judge = ContainsJudge::new(Extractor::LastAssistant);

    let mut target = target;
    let trajectory = target.run("what is the answer?").await;
    let score = judge.score(Some("42"), trajectory).await;
    assert!(score.overall > 0.0);
}

#[tokio::test]
async fn composite_judge_combines_fuzzy_and_contains_with_weights() {
    let fuzzy = Box::new(FuzzyMatchJudge::new(Extractor::LastAssistant, 0.5));
    let contains = Box::new(ContainsJudge::new(Extractor::LastAssistant));
    let composite = CompositeJudge::new(vec![(fuzzy, 0.5), (contains, 0.5)]);

    let mut target = ModelTarget::new(Arc::new(MockClient::new("mock", "forty two")));
    let trajectory = target.run("spell out the answer").await;
    let score = composite.score(Some("forty two"), trajectory).await;
    assert!(score.overall > 0.0);
    assert!(score.dimensions.len() >= 2);
}

#[tokio::test]
async fn eval_runner_scores_every_task_under_bounded_concurrency() {
    let judge = Arc::new(ContainsJudge::new(Extractor::LastAssistant));
    let runner = EvalRunner::new(judge).with_max_concurrency(2);

    let tasks = vec![
        EvalTask::new("greet", "say hello", Some("hello".to_string())),
        EvalTask::new("farewell", "say goodbye", Some("goodbye".to_string())),
        EvalTask::new("thanks", "say thanks", Some("thanks".to_string())),
    ];

    let results = runner
        .run(tasks, || ModelTarget::new(Arc::new(MockClient::new("mock", "hello, goodbye, thanks to all"))))
        .await;

    assert_eq!(results.len(), 3);
    for result in &results {
        assert!(result.score.overall > 0.0);
    }
}

#[tokio::test]
async fn agent_target_runs_a_full_agent_loop_before_judging() {
    let client = MockClient::new("mock", "done");
    let agent = Agent::new("evaluee", Arc::new(client)).with_tools(ToolRegistry::new());
    let mut target = agentloom::eval::target::AgentTarget::new(agent);
    let trajectory = target.run("finish the task").await;
    assert!(!trajectory.messages.is_empty());
    assert_eq!(trajectory.task, "finish the task");
}
