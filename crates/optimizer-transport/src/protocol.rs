//! Wire protocol for the session channel.
//!
//! Inbound frames are [`AgentEvent`]s; the only outbound frame is an answer
//! that resumes the agent after a question.

use optimizer_core::{AgentEvent, Answer, ProtocolError};
use serde::{Deserialize, Serialize};

/// Message from client to agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Resume after a question.
    Answer { question_id: String, answer: String },
}

impl ClientFrame {
    /// Id of the question this frame resumes.
    #[must_use]
    pub fn question_id(&self) -> &str {
        match self {
            Self::Answer { question_id, .. } => question_id,
        }
    }
}

impl From<Answer> for ClientFrame {
    fn from(answer: Answer) -> Self {
        Self::Answer {
            question_id: answer.question_id,
            answer: answer.text,
        }
    }
}

impl From<ClientFrame> for Answer {
    fn from(frame: ClientFrame) -> Self {
        match frame {
            ClientFrame::Answer {
                question_id,
                answer,
            } => Self {
                question_id,
                text: answer,
            },
        }
    }
}

/// Decode one inbound frame.
///
/// # Errors
/// Returns [`ProtocolError::Malformed`] if the frame is not a known event.
pub fn decode_event(frame: &str) -> Result<AgentEvent, ProtocolError> {
    serde_json::from_str(frame).map_err(|e| ProtocolError::malformed(format!("{e} in {}", excerpt(frame))))
}

/// Decode an inbound binary frame holding UTF-8 JSON.
///
/// # Errors
/// Returns [`ProtocolError::Malformed`] on invalid UTF-8 or an unknown event.
pub fn decode_event_bytes(frame: &[u8]) -> Result<AgentEvent, ProtocolError> {
    let text = std::str::from_utf8(frame)
        .map_err(|e| ProtocolError::malformed(format!("binary frame is not UTF-8: {e}")))?;
    decode_event(text)
}

/// Encode an event the way the agent sends it.
///
/// # Errors
/// Returns error if serialization fails.
pub fn encode_event(event: &AgentEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

/// Encode an outbound frame.
///
/// # Errors
/// Returns error if serialization fails.
pub fn encode_client_frame(frame: &ClientFrame) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}

/// Decode an outbound frame (agent side).
///
/// # Errors
/// Returns [`ProtocolError::Malformed`] if the frame is not a known client frame.
pub fn decode_client_frame(frame: &str) -> Result<ClientFrame, ProtocolError> {
    serde_json::from_str(frame).map_err(|e| ProtocolError::malformed(format!("{e} in {}", excerpt(frame))))
}

fn excerpt(frame: &str) -> String {
    const MAX: usize = 80;
    match frame.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &frame[..idx]),
        None => frame.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use optimizer_core::{OptimizationResult, ProgressUpdate, Question, ToolCallRecord};
    use serde_json::json;

    use super::*;

    fn every_event() -> Vec<AgentEvent> {
        let mut args = serde_json::Map::new();
        args.insert("prompt".to_string(), json!("a fox"));
        args.insert("weights".to_string(), json!([1, 2.5]));
        vec![
            AgentEvent::Progress(ProgressUpdate {
                step: 2,
                message: "Scoring prompt".to_string(),
            }),
            AgentEvent::ToolCalled(ToolCallRecord {
                tool: "score_prompt".to_string(),
                args: args.clone(),
                result_summary: Some("score 4.5".to_string()),
            }),
            AgentEvent::ToolCalled(ToolCallRecord {
                tool: "rewrite".to_string(),
                args,
                result_summary: None,
            }),
            AgentEvent::Question(Question {
                question_id: "q1".to_string(),
                question: "Which style?".to_string(),
                reason: "Ambiguous brief".to_string(),
                options: None,
            }),
            AgentEvent::Question(Question {
                question_id: "q2".to_string(),
                question: "Anything else?".to_string(),
                reason: "Open ended".to_string(),
                options: Some(vec![]),
            }),
            AgentEvent::Completed {
                result: OptimizationResult {
                    optimized_prompt: "A fox, golden hour".to_string(),
                    original_score: 4.5,
                    optimized_score: 8.75,
                    improvements: vec!["Lighting".to_string(), "Subject".to_string()],
                    tips: Some(vec!["Try 16:9".to_string()]),
                    parameters: None,
                    reasoning: Some("Clearer subject".to_string()),
                },
            },
            AgentEvent::Error {
                message: "quota exceeded".to_string(),
            },
        ]
    }

    #[test]
    fn test_every_event_roundtrips() {
        for event in every_event() {
            let frame = encode_event(&event).unwrap();
            assert_eq!(decode_event(&frame).unwrap(), event, "frame: {frame}");
        }
    }

    #[test]
    fn test_answer_roundtrip() {
        let answer = Answer {
            question_id: "q1".to_string(),
            text: "red".to_string(),
        };
        let frame = encode_client_frame(&ClientFrame::from(answer.clone())).unwrap();
        assert_eq!(frame, r#"{"type":"answer","question_id":"q1","answer":"red"}"#);
        assert_eq!(Answer::from(decode_client_frame(&frame).unwrap()), answer);
    }

    #[test]
    fn test_optional_fields_encode_as_null() {
        let event = AgentEvent::ToolCalled(ToolCallRecord {
            tool: "t".to_string(),
            args: serde_json::Map::new(),
            result_summary: None,
        });
        assert_eq!(
            encode_event(&event).unwrap(),
            r#"{"type":"tool_called","tool":"t","args":{},"result_summary":null}"#
        );
    }

    #[test]
    fn test_null_and_empty_options_are_distinct() {
        let null = decode_event(
            r#"{"type":"question","question_id":"a","question":"?","reason":"r","options":null}"#,
        )
        .unwrap();
        let empty = decode_event(
            r#"{"type":"question","question_id":"a","question":"?","reason":"r","options":[]}"#,
        )
        .unwrap();
        assert_ne!(null, empty);
        let AgentEvent::Question(q) = empty else {
            panic!("Wrong event type");
        };
        assert_eq!(q.options, Some(vec![]));
    }

    #[test]
    fn test_completed_frame_decodes() {
        let frame = json!({
            "type": "completed",
            "result": {
                "optimized_prompt": "p",
                "original_score": 3,
                "optimized_score": 9.5,
                "improvements": ["a"],
                "tips": null,
                "parameters": "--ar 1:1",
                "reasoning": null
            }
        })
        .to_string();
        let AgentEvent::Completed { result } = decode_event(&frame).unwrap() else {
            panic!("Wrong event type");
        };
        assert!((result.original_score - 3.0).abs() < f64::EPSILON);
        assert_eq!(result.parameters.as_deref(), Some("--ar 1:1"));
    }

    #[test]
    fn test_malformed_frames_rejected() {
        for frame in [
            "not json",
            r#"{"type":"dance"}"#,
            r#"{"type":"progress","message":"missing step"}"#,
            r#"{"type":"tool_called","tool":"t","args":[1],"result_summary":null}"#,
            r#"{"step":1,"message":"no type"}"#,
        ] {
            assert!(
                matches!(decode_event(frame), Err(ProtocolError::Malformed { .. })),
                "accepted: {frame}"
            );
        }
    }

    #[test]
    fn test_binary_frame_must_be_utf8() {
        assert!(decode_event_bytes(br#"{"type":"error","message":"x"}"#).is_ok());
        assert!(matches!(
            decode_event_bytes(&[0xff, 0xfe]),
            Err(ProtocolError::Malformed { .. })
        ));
    }
}
