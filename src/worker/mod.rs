use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::core::{AggregateResult, SimulationParams, run_simulation};

/// Commands accepted by the engine worker. Anything other than `Run` is
/// ignored by the worker loop.
#[derive(Debug, Clone)]
pub enum EngineRequest {
    Run { params: SimulationParams },
}

/// Messages emitted back across the boundary. Zero or more `progress`
/// updates, then exactly one terminal `result` or `error` per run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EngineMessage {
    Progress {
        percent: u8,
        text: String,
    },
    Result {
        result: AggregateResult,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },
}

impl EngineMessage {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EngineMessage::Progress { .. })
    }
}

/// Spawns an engine worker and returns its command/message channel pair.
/// Each `Run` executes to completion on a blocking thread; the worker exits
/// once every command sender is dropped. Progress delivery is best-effort:
/// a consumer that stops listening does not stall the run.
pub fn spawn() -> (
    UnboundedSender<EngineRequest>,
    UnboundedReceiver<EngineMessage>,
) {
    let (req_tx, mut req_rx) = mpsc::unbounded_channel::<EngineRequest>();
    let (msg_tx, msg_rx) = mpsc::unbounded_channel::<EngineMessage>();

    tokio::spawn(async move {
        while let Some(request) = req_rx.recv().await {
            match request {
                EngineRequest::Run { params } => {
                    let progress_tx = msg_tx.clone();
                    let outcome = tokio::task::spawn_blocking(move || {
                        run_simulation(&params, |update| {
                            let _ = progress_tx.send(EngineMessage::Progress {
                                percent: update.percent,
                                text: update.text,
                            });
                        })
                    })
                    .await;

                    let terminal = match outcome {
                        Ok(Ok(result)) => EngineMessage::Result { result },
                        Ok(Err(message)) => EngineMessage::Error {
                            message,
                            stack: None,
                        },
                        Err(err) => EngineMessage::Error {
                            message: format!("simulation task failed: {err}"),
                            stack: None,
                        },
                    };
                    if msg_tx.send(terminal).is_err() {
                        break;
                    }
                }
            }
        }
    });

    (req_tx, msg_rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_params() -> SimulationParams {
        SimulationParams {
            years: 2,
            sims: 40,
            mu: 0.05,
            sigma: 0.15,
            ter: 0.002,
            bollo: 0.002,
            initial: 10_000.0,
            monthly: 500.0,
            adj_infl: false,
            infl: 0.02,
            goal: 50_000.0,
            tax: 0.26,
            seed: 42,
        }
    }

    async fn drain(mut rx: UnboundedReceiver<EngineMessage>) -> Vec<EngineMessage> {
        let mut messages = Vec::new();
        while let Some(msg) = rx.recv().await {
            messages.push(msg);
        }
        messages
    }

    #[tokio::test]
    async fn run_emits_progress_then_one_result() {
        let (tx, rx) = spawn();
        tx.send(EngineRequest::Run {
            params: sample_params(),
        })
        .expect("worker alive");
        drop(tx);

        let messages = drain(rx).await;
        let terminal = messages.last().expect("terminal message");
        assert!(matches!(terminal, EngineMessage::Result { .. }));
        assert_eq!(messages.iter().filter(|m| m.is_terminal()).count(), 1);
        for msg in &messages[..messages.len() - 1] {
            match msg {
                EngineMessage::Progress { percent, .. } => assert!(*percent <= 95),
                other => panic!("unexpected message before terminal: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn invalid_params_surface_as_error_message() {
        let mut params = sample_params();
        params.sims = 0;

        let (tx, rx) = spawn();
        tx.send(EngineRequest::Run { params }).expect("worker alive");
        drop(tx);

        let messages = drain(rx).await;
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            EngineMessage::Error { message, stack } => {
                assert!(message.contains("sims"));
                assert!(stack.is_none());
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sequential_runs_reuse_one_worker() {
        let (tx, rx) = spawn();
        tx.send(EngineRequest::Run {
            params: sample_params(),
        })
        .expect("worker alive");
        tx.send(EngineRequest::Run {
            params: sample_params(),
        })
        .expect("worker alive");
        drop(tx);

        let messages = drain(rx).await;
        assert_eq!(messages.iter().filter(|m| m.is_terminal()).count(), 2);
    }

    #[test]
    fn messages_serialize_with_type_tags() {
        let progress = EngineMessage::Progress {
            percent: 40,
            text: "Trials: 8/20".to_string(),
        };
        let json = serde_json::to_string(&progress).expect("serialize");
        assert!(json.contains("\"type\":\"progress\""));
        assert!(json.contains("\"percent\":40"));

        let error = EngineMessage::Error {
            message: "sims must be >= 1".to_string(),
            stack: None,
        };
        let json = serde_json::to_string(&error).expect("serialize");
        assert!(json.contains("\"type\":\"error\""));
        assert!(!json.contains("stack"));
    }
}
