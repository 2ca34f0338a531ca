//! Integration coverage for termination condition composition against a real
//! `AgentContext` transcript, rather than the hand-built contexts in the unit tests
//! colocated with `src/termination.rs`.

use agentloom::context::AgentContext;
use agentloom::message::Message;
use agentloom::termination::{arc, MaxMessages, MaxTurns, Never, TerminationCondition, TextMention};

fn transcript(turns: &[(&str, &str)]) -> AgentContext {
    let mut ctx = AgentContext::new();
    for (role, text) in turns {
        let message = match *role {
            "user" => Message::user(*text, "user"),
            "assistant" => Message::assistant(*text, "assistant"),
            other => panic!("unsupported role in test fixture: {other}"),
        };
        ctx.push(message);
    }
    ctx
}

#[test]
fn or_composition_stops_as_soon_as_either_side_fires() {
    let condition = arc(MaxTurns::new(100)) | arc(TextMention::new("STOP", true));
    let ctx = transcript(&[("user", "go"), ("assistant", "still working"), ("assistant", "ok, STOP here")]);
    assert!(condition.should_terminate(&ctx));
    assert!(condition.reason().contains("STOP"));
}

#[test]
fn and_composition_requires_both_sides_to_fire() {
    let condition = arc(MaxTurns::new(2)) & arc(TextMention::new("STOP", true));
    let one_turn = transcript(&[("user", "go"), ("assistant", "STOP already")]);
    assert!(!condition.should_terminate(&one_turn));

    let two_turns_no_mention = transcript(&[("user", "go"), ("assistant", "a"), ("assistant", "b")]);
    assert!(!condition.should_terminate(&two_turns_no_mention));

    let both = transcript(&[("user", "go"), ("assistant", "a"), ("assistant", "STOP")]);
    assert!(condition.should_terminate(&both));
}

#[test]
fn never_is_a_neutral_element_under_and() {
    let condition = arc(Never) & arc(MaxMessages::new(1));
    let ctx = transcript(&[("user", "anything")]);
    assert!(!condition.should_terminate(&ctx));
}

#[test]
fn max_turns_counts_assistant_messages_only() {
    let condition = MaxTurns::new(2);
    let ctx = transcript(&[("user", "a"), ("user", "b"), ("user", "c"), ("assistant", "one reply")]);
    assert!(!condition.should_terminate(&ctx));
}

#[test]
fn deeply_nested_composition_still_short_circuits_left_to_right() {
    let condition = (arc(MaxMessages::new(1000)) | arc(TextMention::new("A", true))) & arc(TextMention::new("B", true));
    let a_only = transcript(&[("assistant", "mentions A only")]);
    assert!(!condition.should_terminate(&a_only));

    let a_and_b = transcript(&[("assistant", "mentions A"), ("assistant", "and B too")]);
    assert!(condition.should_terminate(&a_and_b));
}
