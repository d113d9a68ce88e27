use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::Extensions;
use uuid::Uuid;

use crate::errors::AppError;

/// Authenticated actor, placed in request extensions by the authentication layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentActor(pub Uuid);

/// Namespace the current request operates in, placed by `resolve_namespace`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentNamespace(pub Uuid);

/// Explicit actor + scope pair handed to the facade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthzContext {
    pub actor: Option<Uuid>,
    pub namespace: Option<Uuid>,
}

impl AuthzContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_actor(mut self, actor: Uuid) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn with_namespace(mut self, namespace: Uuid) -> Self {
        self.namespace = Some(namespace);
        self
    }

    pub fn from_extensions(extensions: &Extensions) -> Self {
        Self {
            actor: extensions.get::<CurrentActor>().map(|actor| actor.0),
            namespace: extensions.get::<CurrentNamespace>().map(|namespace| namespace.0),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentActor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentActor>()
            .copied()
            .ok_or_else(|| AppError::unauthorized("authentication required"))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthzContext
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_extensions(&parts.extensions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_reads_both_carriers() {
        let actor = Uuid::new_v4();
        let namespace = Uuid::new_v4();
        let mut extensions = Extensions::new();
        extensions.insert(CurrentActor(actor));
        extensions.insert(CurrentNamespace(namespace));

        let ctx = AuthzContext::from_extensions(&extensions);
        assert_eq!(ctx, AuthzContext::new().with_actor(actor).with_namespace(namespace));
    }

    #[test]
    fn test_empty_extensions_give_empty_context() {
        let ctx = AuthzContext::from_extensions(&Extensions::new());
        assert_eq!(ctx.actor, None);
        assert_eq!(ctx.namespace, None);
    }
}
