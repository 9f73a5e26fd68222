//! Render context and the expression translator contract.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bson::{Bson, Document};

use crate::error::{RenderError, RenderResult};
use crate::field::RenderedField;
use crate::projection::RenderedProjection;
use crate::registry::SerializerRegistry;
use crate::serializer::SerializerRef;

/// An opaque, caller-built expression (predicate, projection, field access).
///
/// The renderer never inspects these; it hands them to the configured
/// [`ExpressionTranslator`], which downcasts through [`NativeExpression::as_any`].
pub trait NativeExpression: fmt::Debug + Send + Sync {
    /// Human readable form used in errors and logs.
    fn describe(&self) -> String;

    /// Access the concrete expression for downcasting.
    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to a native expression.
pub type ExpressionRef = Arc<dyn NativeExpression>;

/// Translates native expressions into the shapes hand-written definitions render to.
pub trait ExpressionTranslator: fmt::Debug + Send + Sync {
    /// Translate a predicate into a filter document.
    fn translate_filter(
        &self,
        expression: &dyn NativeExpression,
        context: &RenderContext,
    ) -> RenderResult<Document>;

    /// Translate a member access into a field.
    fn translate_field(
        &self,
        expression: &dyn NativeExpression,
        context: &RenderContext,
    ) -> RenderResult<RenderedField>;

    /// Translate a projection, honouring [`RenderContext::render_for_find`].
    fn translate_projection(
        &self,
        expression: &dyn NativeExpression,
        context: &RenderContext,
    ) -> RenderResult<RenderedProjection>;

    /// Translate an aggregation expression.
    fn translate_expression(
        &self,
        expression: &dyn NativeExpression,
        context: &RenderContext,
    ) -> RenderResult<Bson>;
}

/// Which translator generation native expressions target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TranslationMode {
    /// Aggregation-expression based translation.
    #[default]
    Current,
    /// Query-operator based translation kept for older servers.
    Compatibility,
}

/// Everything a definition needs to render.
///
/// Contexts are values: every `with_*` method returns a derived context and
/// leaves the receiver untouched.
#[derive(Debug, Clone)]
pub struct RenderContext {
    document_serializer: SerializerRef,
    registry: Arc<SerializerRegistry>,
    translator: Option<Arc<dyn ExpressionTranslator>>,
    translation_mode: TranslationMode,
    render_for_find: bool,
    render_dollar_form: bool,
}

impl RenderContext {
    /// Create a context for the given document serializer.
    pub fn new(document_serializer: SerializerRef, registry: Arc<SerializerRegistry>) -> Self {
        Self {
            document_serializer,
            registry,
            translator: None,
            translation_mode: TranslationMode::default(),
            render_for_find: false,
            render_dollar_form: false,
        }
    }

    /// Create a context whose document serializer is the one registered for `T`.
    pub fn for_type<T: 'static>(registry: Arc<SerializerRegistry>) -> Self {
        let serializer = registry.serializer::<T>();
        Self::new(serializer, registry)
    }

    /// Derive a context with an expression translator.
    pub fn with_translator(&self, translator: Arc<dyn ExpressionTranslator>) -> Self {
        Self {
            translator: Some(translator),
            ..self.clone()
        }
    }

    /// Derive a context with another translation mode.
    pub fn with_translation_mode(&self, mode: TranslationMode) -> Self {
        Self {
            translation_mode: mode,
            ..self.clone()
        }
    }

    /// Derive a context assuming another document type.
    pub fn with_document_serializer(&self, serializer: SerializerRef) -> Self {
        Self {
            document_serializer: serializer,
            ..self.clone()
        }
    }

    /// Derive a context assuming the registered document type `T`.
    pub fn with_document_type<T: 'static>(&self) -> Self {
        self.with_document_serializer(self.registry.serializer::<T>())
    }

    /// Derive a context rendering for a find command instead of a pipeline.
    pub fn for_find(&self, render_for_find: bool) -> Self {
        Self {
            render_for_find,
            ..self.clone()
        }
    }

    /// Derive a context rendering equality as `{ field: { $eq: value } }`.
    pub fn with_dollar_form(&self, render_dollar_form: bool) -> Self {
        Self {
            render_dollar_form,
            ..self.clone()
        }
    }

    /// Serializer of the current document type.
    pub fn document_serializer(&self) -> &SerializerRef {
        &self.document_serializer
    }

    /// The serializer registry.
    pub fn registry(&self) -> &Arc<SerializerRegistry> {
        &self.registry
    }

    /// Serializer registered for `T`.
    pub fn serializer_for<T: 'static>(&self) -> SerializerRef {
        self.registry.serializer::<T>()
    }

    /// The configured translator, or an error naming the expression.
    pub fn translator(
        &self,
        expression: &dyn NativeExpression,
    ) -> RenderResult<&dyn ExpressionTranslator> {
        self.translator
            .as_deref()
            .ok_or_else(|| RenderError::UnsupportedExpression(expression.describe()))
    }

    /// Whether a translator is configured.
    pub fn has_translator(&self) -> bool {
        self.translator.is_some()
    }

    /// The translation mode.
    pub fn translation_mode(&self) -> TranslationMode {
        self.translation_mode
    }

    /// Whether rendering targets a find command.
    pub fn render_for_find(&self) -> bool {
        self.render_for_find
    }

    /// Whether equality renders in explicit `$eq` form.
    pub fn render_dollar_form(&self) -> bool {
        self.render_dollar_form
    }

    /// Fail when the current document is a client-side projection.
    pub fn ensure_server_side(&self, operator: &str) -> RenderResult<()> {
        if self.document_serializer.is_client_side_projection() {
            Err(RenderError::client_side_projection(operator))
        } else {
            Ok(())
        }
    }
}
