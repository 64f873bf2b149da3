//! Maps caller actions onto the engine, the session coordinator and the codecs.

use serde_json::{json, Map, Value};
use std::sync::Arc;
use crate::bridge::handle::{CallerHandle, CommandResponse};
use crate::bridge::BridgeContext;
use crate::codec::{data_uri, face};
use crate::common::{BridgeError, Result};
use crate::core::{FaceTemplate, SessionKind, SessionSettings};
use crate::engine::FaceEngine;

/// A request whose arguments have been checked against its action's contract.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Load { credential: Option<String> },
    Unload,
    StartSession { kind: SessionKind, settings: String, credential: Option<String> },
    GetRegisteredUsers,
    DeleteUser { user_id: String },
    CompareFaces { face1: String, face2: String },
    CompareFaceTemplates { template1: String, template2: String },
    DetectFaceInImage { image: String },
    SetTestingMode { enabled: bool },
    CancelSession,
}

impl Command {
    pub fn parse(action: &str, args: &Value) -> Result<Self> {
        let empty = Map::new();
        let args = match args {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => return Err(BridgeError::Argument("arguments must be a JSON object".into())),
        };

        if let Some(kind) = SessionKind::from_action(action) {
            return Ok(Command::StartSession {
                kind,
                settings: settings_arg(args)?,
                credential: optional_string(args, "apiSecret")?,
            });
        }

        let command = match action {
            "load" => Command::Load { credential: optional_string(args, "apiSecret")? },
            "unload" => Command::Unload,
            "getRegisteredUsers" => Command::GetRegisteredUsers,
            "deleteUser" => Command::DeleteUser { user_id: required_string(args, "userId")? },
            "compareFaces" => Command::CompareFaces {
                face1: required_string(args, "face1")?,
                face2: required_string(args, "face2")?,
            },
            "compareFaceTemplates" => Command::CompareFaceTemplates {
                template1: required_string(args, "template1")?,
                template2: required_string(args, "template2")?,
            },
            "detectFaceInImage" => Command::DetectFaceInImage { image: required_string(args, "image")? },
            "setTestingMode" => Command::SetTestingMode {
                enabled: args
                    .get("testingMode")
                    .and_then(Value::as_bool)
                    .ok_or_else(|| BridgeError::Argument("`testingMode` must be a boolean".into()))?,
            },
            "cancelSession" => Command::CancelSession,
            other => return Err(BridgeError::Argument(format!("unknown action `{}`", other))),
        };
        Ok(command)
    }

    pub fn action(&self) -> &'static str {
        match self {
            Command::Load { .. } => "load",
            Command::Unload => "unload",
            Command::StartSession { kind, .. } => kind.action(),
            Command::GetRegisteredUsers => "getRegisteredUsers",
            Command::DeleteUser { .. } => "deleteUser",
            Command::CompareFaces { .. } => "compareFaces",
            Command::CompareFaceTemplates { .. } => "compareFaceTemplates",
            Command::DetectFaceInImage { .. } => "detectFaceInImage",
            Command::SetTestingMode { .. } => "setTestingMode",
            Command::CancelSession => "cancelSession",
        }
    }
}

fn required_string(args: &Map<String, Value>, key: &str) -> Result<String> {
    match args.get(key) {
        Some(Value::String(value)) => Ok(value.clone()),
        Some(Value::Null) | None => Err(BridgeError::Argument(format!("missing required argument `{}`", key))),
        Some(_) => Err(BridgeError::Argument(format!("argument `{}` must be a string", key))),
    }
}

fn optional_string(args: &Map<String, Value>, key: &str) -> Result<Option<String>> {
    match args.get(key) {
        Some(Value::Null) | None => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(BridgeError::Argument(format!("argument `{}` must be a string", key))),
    }
}

// Settings arrive as JSON text; an inline object is accepted too.
fn settings_arg(args: &Map<String, Value>) -> Result<String> {
    match args.get("settings") {
        Some(Value::String(text)) => Ok(text.clone()),
        Some(object @ Value::Object(_)) => Ok(object.to_string()),
        Some(Value::Null) | None => Err(BridgeError::Argument("missing required argument `settings`".into())),
        Some(_) => Err(BridgeError::Argument("argument `settings` must be a JSON string".into())),
    }
}

pub struct CommandRouter {
    context: Arc<BridgeContext>,
}

impl CommandRouter {
    pub fn new(context: Arc<BridgeContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Arc<BridgeContext> {
        &self.context
    }

    /// Routes one request. Exactly one response reaches `caller`, always
    /// through the delivery thread.
    pub fn dispatch(&self, action: &str, args: &Value, caller: CallerHandle) {
        let command = match Command::parse(action, args) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!("Rejecting `{}`: {}", action, e);
                self.context.delivery.post(caller, CommandResponse::from_error(&e));
                return;
            }
        };

        tracing::debug!("Routing `{}` for {}", command.action(), caller.id());
        let context = Arc::clone(&self.context);
        self.context.pool.spawn(move || execute(&context, command, caller));
    }
}

fn execute(context: &Arc<BridgeContext>, command: Command, caller: CallerHandle) {
    let action = command.action();
    match command {
        Command::Load { credential } => {
            let delivery = context.delivery.clone();
            context.environment.with_engine(
                credential,
                Box::new(move |engine| delivery.post(caller, respond(action, engine.map(|_| None)))),
            );
        }
        Command::Unload => {
            context.coordinator.cancel();
            context.environment.unload();
            context.delivery.post(caller, CommandResponse::ack());
        }
        Command::StartSession { kind, settings, credential } => {
            let settings = SessionSettings::decode(kind, &settings);
            let started = context
                .coordinator
                .start_session(kind, settings, credential, caller.clone());
            if let Err(e) = started {
                context.delivery.post(caller, respond(action, Err(e)));
            }
        }
        Command::SetTestingMode { enabled } => {
            context.environment.set_testing_mode(enabled);
            context.delivery.post(caller, CommandResponse::ack());
        }
        Command::CancelSession => {
            let canceled = context.coordinator.cancel();
            context.delivery.post(caller, CommandResponse::ok(json!({ "canceled": canceled })));
        }
        Command::GetRegisteredUsers => with_engine(context, caller, action, |engine| {
            Ok(Some(json!(engine.registered_users()?)))
        }),
        Command::DeleteUser { user_id } => with_engine(context, caller, action, move |engine| {
            engine.delete_user(&user_id)?;
            Ok(None)
        }),
        Command::CompareFaces { face1, face2 } => {
            let templates = face_template(&face1, "face1")
                .and_then(|first| Ok((first, face_template(&face2, "face2")?)));
            match templates {
                Ok((first, second)) => with_engine(context, caller, action, move |engine| {
                    compare(engine, &first, &second)
                }),
                Err(e) => context.delivery.post(caller, respond(action, Err(e))),
            }
        }
        Command::CompareFaceTemplates { template1, template2 } => {
            let templates = face::decode_template_str(&template1)
                .and_then(|first| Ok((first, face::decode_template_str(&template2)?)));
            match templates {
                Ok((first, second)) => with_engine(context, caller, action, move |engine| {
                    compare(engine, &first, &second)
                }),
                Err(e) => context.delivery.post(caller, respond(action, Err(e))),
            }
        }
        Command::DetectFaceInImage { image } => match decode_image(&image) {
            Ok(image) => with_engine(context, caller, action, move |engine| {
                detect_face(engine, &image).map(Some)
            }),
            Err(e) => context.delivery.post(caller, respond(action, Err(e))),
        },
    }
}

/// Runs `handler` once the engine is available and posts its outcome.
fn with_engine<F>(context: &Arc<BridgeContext>, caller: CallerHandle, action: &'static str, handler: F)
where
    F: FnOnce(&dyn FaceEngine) -> Result<Option<Value>> + Send + 'static,
{
    let delivery = context.delivery.clone();
    context.environment.with_engine(
        None,
        Box::new(move |engine| {
            let result = engine.and_then(|engine| handler(engine.as_ref()));
            delivery.post(caller, respond(action, result));
        }),
    );
}

fn respond(action: &str, result: Result<Option<Value>>) -> CommandResponse {
    match result {
        Ok(payload) => CommandResponse::Ok(payload),
        Err(e) => {
            tracing::warn!("`{}` failed: {}", action, e);
            CommandResponse::from_error(&e)
        }
    }
}

fn face_template(text: &str, key: &str) -> Result<FaceTemplate> {
    let (_, template) = face::decode_str(text)?;
    template.ok_or_else(|| BridgeError::MissingTemplate(format!("`{}` has no faceTemplate", key)))
}

fn compare(engine: &dyn FaceEngine, first: &FaceTemplate, second: &FaceTemplate) -> Result<Option<Value>> {
    let score = engine.compare(first, second)?;
    let range = engine.score_range();
    Ok(Some(json!({
        "score": score,
        "authenticationThreshold": range.authentication_threshold,
        "max": range.max,
    })))
}

fn decode_image(uri: &str) -> Result<image::DynamicImage> {
    let bytes = data_uri::decode(uri)?;
    image::load_from_memory(&bytes)
        .map_err(|e| BridgeError::MalformedDataUri(format!("payload is not a readable image: {}", e)))
}

fn detect_face(engine: &dyn FaceEngine, image: &image::DynamicImage) -> Result<Value> {
    let detected = engine
        .detect_faces(image, 1)?
        .into_iter()
        .next()
        .ok_or_else(|| BridgeError::TemplateExtraction("no face found in image".into()))?;

    let template = engine.extract_template(image, &detected).map_err(|e| match e {
        BridgeError::TemplateExtraction(_) => e,
        other => BridgeError::TemplateExtraction(other.to_string()),
    })?;

    Ok(face::encode(&detected, Some(&template)))
}
