//! The request-handler registry.
//!
//! Handlers are registered per `Profile` property value. A C++ BLIP
//! implementation lets a handler "throw" to produce an error response;
//! idiomatic Rust expresses that as `Err`, so a handler returns
//! [`Result<HandlerOutcome, HandlerError>`] and the engine turns an `Err`
//! into a BLIP error response rather than unwinding (see `DESIGN.md`).

use std::collections::HashMap;
use std::sync::Arc;

use blip_proto::{CompletedMessage, MessageBuilder};

/// What a handler decided to do with a request it received.
pub enum HandlerOutcome {
    /// Send `builder` back as the response immediately.
    Respond(MessageBuilder),
    /// The handler has taken ownership of replying later (e.g. after
    /// asynchronous work); the engine does not auto-respond.
    Deferred,
}

/// A domain/code/message triple a handler raises instead of responding,
/// translated into a BLIP error response.
#[derive(Debug, Clone)]
pub struct HandlerError {
    pub domain: String,
    pub code: i32,
    pub message: String,
}

impl HandlerError {
    /// A `BLIP`-domain error, the engine's own vocabulary.
    #[must_use]
    pub fn blip(code: i32, message: impl Into<String>) -> Self {
        Self { domain: blip_proto::BLIP_ERROR_DOMAIN.to_string(), code, message: message.into() }
    }

    /// `BLIP/404`: no handler was registered for the request's `Profile`.
    #[must_use]
    pub fn no_handler(profile: &str) -> Self {
        Self::blip(404, format!("No handler for profile {profile:?}"))
    }

    /// `BLIP/501`: the handler itself failed.
    #[must_use]
    pub fn handler_failed(message: impl Into<String>) -> Self {
        Self::blip(501, message)
    }
}

/// A registered request handler. Takes the completed request (properties
/// always present; body present unless the handler was registered with
/// [`HandlerRegistry::on_beginning`]) and decides how to respond.
pub trait Handler: Send + Sync {
    /// Handles one request for this profile.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError`] when the request cannot be satisfied; the
    /// engine converts this into a BLIP error response automatically.
    fn handle(&self, request: &CompletedMessage) -> Result<HandlerOutcome, HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(&CompletedMessage) -> Result<HandlerOutcome, HandlerError> + Send + Sync,
{
    fn handle(&self, request: &CompletedMessage) -> Result<HandlerOutcome, HandlerError> {
        self(request)
    }
}

/// Maps `Profile` values to the handlers registered for them.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    /// Handlers invoked once the request is fully assembled.
    on_complete: HashMap<String, Arc<dyn Handler>>,
    /// Handlers invoked as soon as properties are parsed, before the body
    /// has necessarily finished arriving; used for streaming uploads.
    on_beginning: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    /// An empty registry; every request gets a `404`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `profile`, invoked once the request body has
    /// fully arrived.
    pub fn register(&mut self, profile: impl Into<String>, handler: impl Handler + 'static) {
        self.on_complete.insert(profile.into(), Arc::new(handler));
    }

    /// Registers `handler` for `profile`, invoked as soon as the request's
    /// properties are parsed.
    pub fn register_at_beginning(
        &mut self,
        profile: impl Into<String>,
        handler: impl Handler + 'static,
    ) {
        self.on_beginning.insert(profile.into(), Arc::new(handler));
    }

    /// The at-beginning handler for `profile`, if any.
    #[must_use]
    pub fn beginning_handler(&self, profile: &str) -> Option<Arc<dyn Handler>> {
        self.on_beginning.get(profile).cloned()
    }

    /// The complete-request handler for `profile`, if any.
    #[must_use]
    pub fn complete_handler(&self, profile: &str) -> Option<Arc<dyn Handler>> {
        self.on_complete.get(profile).cloned()
    }
}

#[cfg(test)]
mod tests {
    use blip_proto::Properties;

    use super::*;

    fn request(profile: &str) -> CompletedMessage {
        CompletedMessage {
            msg_no: blip_proto::MessageNo(1),
            urgent: false,
            no_reply: false,
            properties: Properties::new().with(blip_proto::PROFILE, profile),
            body: bytes::Bytes::new(),
        }
    }

    #[test]
    fn missing_profile_has_no_handler() {
        let registry = HandlerRegistry::new();
        assert!(registry.complete_handler("Echo").is_none());
    }

    #[test]
    fn registered_handler_is_found_by_profile() {
        let mut registry = HandlerRegistry::new();
        registry.register("Echo", |req: &CompletedMessage| {
            Ok(HandlerOutcome::Respond(MessageBuilder::new().body(req.body.clone())))
        });
        let handler = registry.complete_handler("Echo").expect("registered");
        let outcome = handler.handle(&request("Echo")).expect("handles ok");
        assert!(matches!(outcome, HandlerOutcome::Respond(_)));
    }

    #[test]
    fn handler_error_carries_blip_domain() {
        let err = HandlerError::no_handler("Unknown");
        assert_eq!(err.domain, "BLIP");
        assert_eq!(err.code, 404);
    }
}
