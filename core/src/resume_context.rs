//! Resume-context block for mid-run continuation (spec.md §4.7 step 11,
//! §8 scenario 5). Distinct from `queue`'s `RESUME_CONTEXT_PREFIX`, which
//! only marks an auto-resume-after-restart task: this block carries the
//! answered questions and latest todo list forward from the event log so
//! a resumed run doesn't re-ask what's already been settled.

use std::collections::HashMap;

use sandboxd_event_log::EventType;
use sandboxd_protocol::Event;

pub fn build_resume_context(events: &[Event]) -> Option<String> {
    let mut pending: HashMap<String, String> = HashMap::new();
    let mut answered: Vec<(String, String)> = Vec::new();
    let mut latest_todos: Option<Vec<serde_json::Value>> = None;

    for event in events {
        if event.event_type == EventType::QuestionPending.as_str() {
            if let Some(id) = event.data.get("question_id").and_then(|v| v.as_str()) {
                let question = event.data.get("question").and_then(|v| v.as_str()).unwrap_or_default();
                pending.insert(id.to_string(), question.to_string());
            }
        } else if event.event_type == EventType::QuestionAnswered.as_str() {
            if let Some(id) = event.data.get("question_id").and_then(|v| v.as_str()) {
                if let Some(question) = pending.remove(id) {
                    let answer = event.data.get("answer").and_then(|v| v.as_str()).unwrap_or_default();
                    answered.push((question, answer.to_string()));
                }
            }
        } else if event.event_type == EventType::TodoUpdate.as_str() {
            if let Some(todos) = event.data.get("todos").and_then(|v| v.as_array()) {
                latest_todos = Some(todos.clone());
            }
        }
    }

    let todos = latest_todos.filter(|t| !t.is_empty());
    if answered.is_empty() && todos.is_none() {
        return None;
    }

    let mut block = String::from("<resume-context>\n");
    if !answered.is_empty() {
        block.push_str(&render_questions(&answered));
    }
    if let Some(todos) = todos {
        block.push_str("Todos:\n");
        for todo in &todos {
            let content = todo.get("content").and_then(|v| v.as_str()).unwrap_or_default();
            let status = todo.get("status").and_then(|v| v.as_str()).unwrap_or("pending");
            block.push_str(&format!("- [{status}] {content}\n"));
        }
    }
    block.push_str("</resume-context>");
    Some(block)
}

fn render_questions(answered: &[(String, String)]) -> String {
    let mut out = String::from("Previously answered questions:\n");
    for (question, answer) in answered {
        out.push_str(&format!("Q: {question}\nA: {answer}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn event(seq: u64, event_type: EventType, data: serde_json::Value) -> Event {
        Event::new(Uuid::new_v4(), seq, event_type, data)
    }

    #[test]
    fn no_qa_and_no_todos_yields_nothing() {
        let events = vec![event(1, EventType::AgentStart, serde_json::json!({}))];
        assert!(build_resume_context(&events).is_none());
    }

    #[test]
    fn answered_question_renders_q_and_a() {
        let events = vec![
            event(1, EventType::QuestionPending, serde_json::json!({"question_id": "q1", "question": "Use npm or yarn?"})),
            event(2, EventType::QuestionAnswered, serde_json::json!({"question_id": "q1", "answer": "npm"})),
        ];
        let block = build_resume_context(&events).unwrap();
        assert!(block.contains("Use npm or yarn?"));
        assert!(block.contains("npm"));
    }

    #[test]
    fn unanswered_pending_question_is_not_included() {
        let events = vec![event(
            1,
            EventType::QuestionPending,
            serde_json::json!({"question_id": "q1", "question": "Use npm or yarn?"}),
        )];
        assert!(build_resume_context(&events).is_none());
    }
}
