//! Integration coverage for multi-agent orchestration: selection policies driving a
//! real set of registered agents to completion under a shared termination condition.

use agentloom::client::{MockClient, ScriptedResponse};
use agentloom::orchestrator::{AiSelectedPolicy, Orchestrator, PlanBasedPolicy, RoundRobinPolicy};
use agentloom::termination::{arc, MaxTurns, TextMention};
use agentloom::Agent;
use std::sync::Arc;

#[tokio::test]
async fn round_robin_cycles_agents_until_max_turns() {
    let mut orchestrator = Orchestrator::new(Box::new(RoundRobinPolicy::new()), arc(MaxTurns::new(4)))
        .with_agent("alice", "first responder", Agent::new("alice", Arc::new(MockClient::new("mock", "alice speaking"))))
        .with_agent("bob", "second responder", Agent::new("bob", Arc::new(MockClient::new("mock", "bob speaking"))));

    let response = orchestrator.run("kick things off").await;
    assert!(response.messages.len() >= 4);
    assert!(response
        .messages
        .iter()
        .filter(|m| m.content().contains("alice speaking"))
        .count()
        >= 1);
    assert!(response
        .messages
        .iter()
        .filter(|m| m.content().contains("bob speaking"))
        .count()
        >= 1);
}

#[tokio::test]
async fn text_mention_termination_stops_as_soon_as_either_agent_says_it() {
    let mut orchestrator = Orchestrator::new(
        Box::new(RoundRobinPolicy::new()),
        arc(TextMention::new("DONE", true)),
    )
    .with_max_iterations(10)
    .with_agent("worker", "does the work", Agent::new("worker", Arc::new(MockClient::new("mock", "still working"))))
    .with_agent(
        "closer",
        "wraps up",
        Agent::new("closer", Arc::new(MockClient::new("mock", "all set, DONE"))),
    );

    let response = orchestrator.run("start").await;
    assert!(response.messages.iter().any(|m| m.content().contains("DONE")));
}

#[tokio::test]
async fn ai_selected_policy_falls_back_to_round_robin_on_unparseable_selection() {
    let selector = MockClient::new("mock", "not json at all");
    let mut orchestrator = Orchestrator::new(Box::new(AiSelectedPolicy::new(Arc::new(selector))), arc(MaxTurns::new(2)))
        .with_agent("a", "agent a", Agent::new("a", Arc::new(MockClient::new("mock", "a response"))))
        .with_agent("b", "agent b", Agent::new("b", Arc::new(MockClient::new("mock", "b response"))));

    let response = orchestrator.run("go").await;
    assert!(!response.messages.is_empty());
}

#[tokio::test]
async fn plan_based_policy_produces_a_fallback_plan_when_model_is_uncooperative() {
    let planner = MockClient::new("mock", "I refuse to produce a plan");
    let policy = PlanBasedPolicy::new(Arc::new(planner), 2);
    let mut orchestrator = Orchestrator::new(Box::new(policy), arc(MaxTurns::new(6)))
        .with_agent("writer", "writes content", Agent::new("writer", Arc::new(MockClient::new("mock", "written"))))
        .with_agent("reviewer", "reviews content", Agent::new("reviewer", Arc::new(MockClient::new("mock", "reviewed"))));

    let response = orchestrator.run("ship the feature").await;
    assert!(response.pattern_metadata.get("plan").is_some());
}
