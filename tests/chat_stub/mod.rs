use std::io::Read as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::Context as _;
use serde_json::Value;

/// Chat-completions endpoint serving canned course material. Replies are
/// dispatched on prompt markers, so the stub answers whichever pipeline step
/// is asking without any scripting from the test.
pub struct ChatStub {
    pub base_url: String,
    requests: Arc<AtomicUsize>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ChatStub {
    pub fn spawn() -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start chat stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}/v1");

        let requests = Arc::new(AtomicUsize::new(0));
        let counter = requests.clone();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let path = request.url().to_string();
                if request.method() != &tiny_http::Method::Post || path != "/v1/chat/completions"
                {
                    let _ = request.respond(
                        tiny_http::Response::from_string("not found").with_status_code(404),
                    );
                    continue;
                }
                counter.fetch_add(1, Ordering::SeqCst);

                let authorized = request.headers().iter().any(|header| {
                    header.field.equiv("Authorization")
                        && header.value.as_str().starts_with("Bearer ")
                });
                if !authorized {
                    let body = serde_json::json!({
                        "error": {
                            "message": "missing bearer token",
                            "type": "invalid_request_error"
                        }
                    });
                    let _ = request.respond(
                        tiny_http::Response::from_string(body.to_string()).with_status_code(401),
                    );
                    continue;
                }

                let mut body = String::new();
                if request.as_reader().read_to_string(&mut body).is_err() {
                    let _ = request.respond(
                        tiny_http::Response::from_string("invalid request body")
                            .with_status_code(400),
                    );
                    continue;
                }

                let parsed: Value = match serde_json::from_str(&body) {
                    Ok(value) => value,
                    Err(_) => {
                        let _ = request.respond(
                            tiny_http::Response::from_string("invalid json").with_status_code(400),
                        );
                        continue;
                    }
                };

                let Some(prompt) = user_message(&parsed) else {
                    let _ = request.respond(
                        tiny_http::Response::from_string("missing user message")
                            .with_status_code(400),
                    );
                    continue;
                };

                let content = if prompt.contains("BEGIN_PLANNING_CONVERSATION") {
                    match outline_reply(prompt) {
                        Ok(text) => text,
                        Err(err) => {
                            let _ = request.respond(
                                tiny_http::Response::from_string(format!(
                                    "failed to build outline reply: {err}"
                                ))
                                .with_status_code(400),
                            );
                            continue;
                        }
                    }
                } else if prompt.contains("creating content for stage") {
                    match stage_reply(prompt) {
                        Ok(text) => text,
                        Err(err) => {
                            let _ = request.respond(
                                tiny_http::Response::from_string(format!(
                                    "failed to build stage reply: {err}"
                                ))
                                .with_status_code(400),
                            );
                            continue;
                        }
                    }
                } else if prompt.contains("Create a video script") {
                    video_reply()
                } else if prompt.contains("Create a podcast script") {
                    podcast_reply()
                } else if prompt.contains("BEGIN_CONVERSATION") {
                    extraction_reply()
                } else {
                    let _ = request.respond(
                        tiny_http::Response::from_string("unknown prompt mode")
                            .with_status_code(400),
                    );
                    continue;
                };

                let response_body = serde_json::json!({
                    "id": "chatcmpl-stub",
                    "object": "chat.completion",
                    "model": parsed
                        .get("model")
                        .cloned()
                        .unwrap_or(Value::String("stub-model".to_owned())),
                    "choices": [
                        {
                            "index": 0,
                            "message": { "role": "assistant", "content": content },
                            "finish_reason": "stop"
                        }
                    ]
                });

                let mut response = tiny_http::Response::from_string(response_body.to_string())
                    .with_status_code(200);
                let header =
                    tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                        .expect("build header");
                response = response.with_header(header);
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Completion requests served so far, including rejected ones.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Drop for ChatStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn user_message(body: &Value) -> Option<&str> {
    body.get("messages")?
        .as_array()?
        .iter()
        .find(|message| message.get("role").and_then(Value::as_str) == Some("user"))?
        .get("content")?
        .as_str()
}

fn extract_between<'a>(text: &'a str, begin: &str, end: &str) -> Option<&'a str> {
    let start = text.find(begin)? + begin.len();
    let rest = &text[start..];
    let end_rel = rest.find(end)?;
    Some(&rest[..end_rel])
}

/// A deliberately weak extraction: vague title, wrong stage count. The
/// conversation in the test states both outright, so the client-side
/// refinement is expected to override them.
fn extraction_reply() -> String {
    let config = serde_json::json!({
        "title": "Untitled Draft",
        "topic": "The Rust borrow checker",
        "description": "How ownership and borrowing keep Rust programs memory safe.",
        "objectives": [
            "Explain ownership and moves",
            "Read borrow checker errors without panic"
        ],
        "targetAudience": "Developers new to Rust",
        "contentStyle": "technical",
        "stageCount": 5,
        "estimatedDuration": "20 minutes",
        "confidence": {
            "title": 0.2,
            "topic": 0.9,
            "description": 0.6,
            "objectives": 0.7,
            "targetAudience": 0.8,
            "contentStyle": 0.6,
            "stageCount": 0.3
        }
    });
    format!("Here is the configuration you asked for:\n```json\n{config}\n```")
}

fn outline_reply(prompt: &str) -> anyhow::Result<String> {
    let requested: usize = extract_between(prompt, "with EXACTLY ", " stages")
        .context("missing stage count in outline prompt")?
        .trim()
        .parse()
        .context("parse requested stage count")?;
    let title = extract_between(prompt, "- Title: ", "\n")
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .unwrap_or("Stub Course");

    let stages = (1..=requested)
        .map(|id| {
            serde_json::json!({
                "id": id,
                "title": format!("Step {id}: Reading the Compiler"),
                "objective": format!("Understand the rule behind error group {id}"),
                "keyPoints": [
                    format!("Key point {id}.1"),
                    format!("Key point {id}.2")
                ],
                "estimatedDuration": "4 minutes"
            })
        })
        .collect::<Vec<_>>();

    Ok(serde_json::json!({
        "course": {
            "title": title,
            "description": "A compact course assembled by the stub endpoint.",
            "duration": "15 minutes",
            "stages": stages
        }
    })
    .to_string())
}

fn stage_reply(prompt: &str) -> anyhow::Result<String> {
    let stage_title = extract_between(prompt, "Stage details:\n- Title: ", "\n")
        .context("missing stage title in content prompt")?
        .trim();

    let introduction = format!(
        "{stage_title} is where most newcomers meet the compiler head on. This stage works \
         through the rules slowly, one small example per rule, so the error messages start \
         reading as guidance instead of rejection."
    );

    Ok(serde_json::json!({
        "introduction": introduction,
        "sections": [
            {
                "heading": format!("{stage_title} in practice"),
                "content": "Every rule here is enforced at compile time, which means the cost \
                            of a mistake is an error message rather than a crash in production.",
                "type": "text"
            },
            {
                "heading": "Worked example",
                "content": "We break one short program on purpose, read the error from top to \
                            bottom, and apply the smallest fix that makes the borrow legal.",
                "type": "list",
                "items": [
                    "Read the error",
                    "Find the conflicting borrow",
                    "Shrink its scope"
                ]
            }
        ],
        "summary": "You can now spot the rule behind the error and fix the borrow instead of \
                    fighting it.",
        "interactiveElements": [
            {
                "type": "quiz",
                "data": {
                    "question": "When does borrow checking happen?",
                    "options": ["At compile time", "At run time", "Only under Miri"],
                    "correctAnswer": "At compile time",
                    "explanation": "Borrow checking is static analysis; the compiled binary \
                                    carries no trace of it."
                }
            }
        ],
        "sideCard": {
            "title": "Pro Tips",
            "content": "Let the compiler drive the refactor.",
            "tips": [
                "Fix one borrow at a time",
                "Prefer shorter lifetimes",
                "Clone as a last resort"
            ]
        }
    })
    .to_string())
}

fn video_reply() -> String {
    let scenes = (1..=5)
        .map(|n| {
            serde_json::json!({
                "sceneNumber": n,
                "title": format!("Scene {n}"),
                "narration": format!("Narration for scene {n}, spoken over the visuals."),
                "visuals": "Terminal with a failing build, then the fixed code side by side.",
                "duration": 30
            })
        })
        .collect::<Vec<_>>();
    serde_json::json!({ "scenes": scenes }).to_string()
}

fn podcast_reply() -> String {
    serde_json::json!({
        "episodes": [
            {
                "episodeNumber": 1,
                "segments": [
                    {
                        "speaker": "host",
                        "text": "Welcome back. Today we're untangling the borrow checker."
                    },
                    {
                        "speaker": "expert",
                        "content": "Happy to be here. It's friendlier than its reputation."
                    },
                    {
                        "speaker": "host",
                        "text": "Where do people usually get stuck first?"
                    },
                    {
                        "speaker": "expert",
                        "text": "Mutable aliasing. Two handles to one value, one of them writing."
                    }
                ]
            }
        ]
    })
    .to_string()
}
