//! Action dispatch table.
//!
//! Every request goes through the same gate before any handler runs:
//!
//! 1. only REQUEST messages are dispatched;
//! 2. non-public actions need an authenticated session, checked without
//!    touching any collaborator;
//! 3. unknown actions are rejected;
//! 4. the auth collaborator must permit the action for the session's role.
//!
//! Handlers run on the blocking pool. Errors and panics become error
//! responses for the same action; nothing escapes to the connection.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{Result, SmsError};
use crate::protocol::{text, Message};
use crate::services::{Identity, Services};

/// Per-request view of the session, owned so it can cross into the blocking pool.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Stable id of the connection
    pub connection_id: String,
    /// Remote endpoint, for auditing
    pub remote_addr: String,
    /// Identity bound to the session, if logged in
    pub user: Option<Identity>,
}

impl RequestContext {
    /// The logged-in identity, or `Unauthorized`
    pub fn require_user(&self) -> Result<&Identity> {
        self.user
            .as_ref()
            .ok_or_else(|| SmsError::Unauthorized("not logged in".into()))
    }
}

/// Effect of a handled request on the session's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    /// Identity unchanged
    None,
    /// Bind this identity to the session
    Login(Identity),
    /// Clear the session identity
    Logout,
}

/// Response plus session side effect.
#[derive(Debug, Clone)]
pub struct Outcome {
    /// Message sent back to the client
    pub response: Message,
    /// Identity change to apply
    pub change: SessionChange,
}

impl Outcome {
    /// Plain reply
    pub fn reply(response: Message) -> Self {
        Self {
            response,
            change: SessionChange::None,
        }
    }

    /// Reply and bind `identity`
    pub fn login(response: Message, identity: Identity) -> Self {
        Self {
            response,
            change: SessionChange::Login(identity),
        }
    }

    /// Reply and clear the identity
    pub fn logout(response: Message) -> Self {
        Self {
            response,
            change: SessionChange::Logout,
        }
    }
}

/// Handler for one action.
pub trait ActionHandler: Send + Sync {
    /// Handle `request`. Runs on the blocking pool and may call collaborators.
    fn handle(&self, ctx: &RequestContext, services: &Services, request: &Message) -> Result<Outcome>;
}

impl<F> ActionHandler for F
where
    F: Fn(&RequestContext, &Services, &Message) -> Result<Outcome> + Send + Sync,
{
    fn handle(&self, ctx: &RequestContext, services: &Services, request: &Message) -> Result<Outcome> {
        self(ctx, services, request)
    }
}

/// Action-keyed handler table, built once at startup.
pub struct Dispatcher {
    routes: HashMap<String, Arc<dyn ActionHandler>>,
    public: HashSet<String>,
    services: Services,
}

impl Dispatcher {
    /// Empty table over `services`
    pub fn new(services: Services) -> Self {
        Self {
            routes: HashMap::new(),
            public: HashSet::new(),
            services,
        }
    }

    /// Table with every built-in action registered
    pub fn with_default_routes(services: Services) -> Self {
        let mut dispatcher = Self::new(services);
        super::actions::register_all(&mut dispatcher);
        dispatcher
    }

    /// Register a handler that requires a logged-in session
    pub fn register(&mut self, action: &str, handler: impl ActionHandler + 'static) -> &mut Self {
        self.routes.insert(action.to_string(), Arc::new(handler));
        self
    }

    /// Register a handler callable before login
    pub fn register_public(&mut self, action: &str, handler: impl ActionHandler + 'static) -> &mut Self {
        self.public.insert(action.to_string());
        self.register(action, handler)
    }

    /// Route `alias` to the handler of `target`. Returns `false` if `target` is unknown.
    pub fn alias(&mut self, alias: &str, target: &str) -> bool {
        let Some(handler) = self.routes.get(target).cloned() else {
            return false;
        };
        if self.public.contains(target) {
            self.public.insert(alias.to_string());
        }
        self.routes.insert(alias.to_string(), handler);
        true
    }

    /// Whether `action` has a handler
    pub fn contains(&self, action: &str) -> bool {
        self.routes.contains_key(action)
    }

    /// Registered actions, sorted
    pub fn actions(&self) -> Vec<&str> {
        let mut actions: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        actions.sort_unstable();
        actions
    }

    /// Collaborators handed to handlers
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Handle one inbound message. Always yields a response for the same action,
    /// echoing the request's correlation id.
    pub async fn dispatch(&self, ctx: RequestContext, request: Message) -> Outcome {
        let correlation_id = request.correlation_id().map(str::to_string);
        let mut outcome = self.route(ctx, request).await;
        if let Some(id) = correlation_id {
            outcome.response.set_correlation_id(&id);
        }
        outcome
    }

    async fn route(&self, ctx: RequestContext, request: Message) -> Outcome {
        let action = request.action.clone();

        if !request.is_request() {
            tracing::debug!(connection_id = %ctx.connection_id, %action, kind = ?request.kind, "Rejecting non-request message");
            return Outcome::reply(Message::error_response(&action, text::INVALID_DATA));
        }

        let public = self.public.contains(&action);
        if !public && ctx.user.is_none() {
            tracing::debug!(connection_id = %ctx.connection_id, %action, "Rejecting request before login");
            return Outcome::reply(Message::error_response(&action, text::UNAUTHORIZED));
        }

        let Some(handler) = self.routes.get(&action).cloned() else {
            tracing::debug!(connection_id = %ctx.connection_id, %action, "Unknown action");
            return Outcome::reply(Message::error_response(&action, &text::unknown_action(&action)));
        };

        let services = self.services.clone();
        let connection_id = ctx.connection_id.clone();
        let task = tokio::task::spawn_blocking(move || -> Result<Outcome> {
            if !public {
                let user = ctx.require_user()?;
                if !services.auth.permits(user, &request.action) {
                    return Err(SmsError::Unauthorized(format!(
                        "{} may not {}",
                        user.role, request.action
                    )));
                }
            }
            handler.handle(&ctx, &services, &request)
        });

        match task.await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                match &e {
                    SmsError::Collaborator(_) | SmsError::Server(_) => {
                        tracing::error!(%connection_id, %action, "Request failed: {}", e);
                    },
                    _ => tracing::debug!(%connection_id, %action, "Request rejected: {}", e),
                }
                Outcome::reply(Message::error_response(&action, &e.client_text()))
            },
            Err(e) => {
                tracing::error!(%connection_id, %action, "Handler aborted: {}", e);
                Outcome::reply(Message::error_response(&action, text::SERVER_ERROR))
            },
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("actions", &self.actions())
            .finish_non_exhaustive()
    }
}
