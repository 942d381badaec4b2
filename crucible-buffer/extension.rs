//! Language-keyed extension binding.
//!
//! Symbol resolution and rename support are provided per language by the
//! application's extension registry. The buffer does not know which
//! implementations exist; it pushes its current language id through an
//! [`ExtensionAdapter`] and uses whatever comes back.

use std::{
  fmt,
  rc::Rc,
  sync::Arc,
};

use async_trait::async_trait;
use crucible_core::{
  SourceLocation,
  SourceRange,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Identifier of a source language ("rust", "c", ...), as produced by
/// content-type detection or explicit assignment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LanguageId(Arc<str>);

impl LanguageId {
  pub fn new(id: impl AsRef<str>) -> Self {
    Self(Arc::from(id.as_ref()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl From<&str> for LanguageId {
  fn from(id: &str) -> Self {
    Self::new(id)
  }
}

impl fmt::Display for LanguageId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Debug, Error)]
pub enum ExtensionError {
  #[error("lookup cancelled")]
  Cancelled,
  #[error("{0}")]
  Provider(String),
}

/// A symbol found at a source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
  pub name:     String,
  pub location: SourceLocation,
}

/// One replacement produced by a rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
  pub range:       SourceRange,
  pub replacement: String,
}

#[async_trait(?Send)]
pub trait SymbolResolver {
  /// Called once when the resolver is newly bound to a buffer.
  fn load(&self) {}

  /// Cancelled lookups must settle with [`ExtensionError::Cancelled`]
  /// instead of mutating any state.
  async fn lookup_symbol(
    &self,
    location: SourceLocation,
    cancel: CancellationToken,
  ) -> Result<Symbol, ExtensionError>;
}

#[async_trait(?Send)]
pub trait RenameProvider {
  /// Called once when the provider is newly bound to a buffer.
  fn load(&self) {}

  async fn rename(
    &self,
    location: SourceLocation,
    new_name: &str,
    cancel: CancellationToken,
  ) -> Result<Vec<TextEdit>, ExtensionError>;
}

/// A capability-typed handle returned by the registry.
#[derive(Clone)]
pub enum Extension {
  SymbolResolver(Rc<dyn SymbolResolver>),
  RenameProvider(Rc<dyn RenameProvider>),
}

impl Extension {
  pub fn load(&self) {
    match self {
      Extension::SymbolResolver(resolver) => resolver.load(),
      Extension::RenameProvider(provider) => provider.load(),
    }
  }
}

/// The capabilities a buffer binds through the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
  SymbolResolver,
  RenameProvider,
}

/// One selector into the extension registry, for one capability. Pushing a
/// language id re-resolves the best-matching implementation; `extension`
/// returns the currently selected one.
pub trait ExtensionAdapter {
  fn set_language(&self, language: Option<&LanguageId>);
  fn extension(&self) -> Option<Extension>;
}

/// Factory for per-buffer adapters, owned by the context.
pub trait ExtensionRegistry {
  fn adapter(&self, capability: Capability) -> Rc<dyn ExtensionAdapter>;
}

/// The buffer's two capability bindings, rebound together on every language
/// change.
#[derive(Default)]
pub struct ExtensionBindings {
  symbol_resolver: Option<Rc<dyn ExtensionAdapter>>,
  rename_provider: Option<Rc<dyn ExtensionAdapter>>,
}

impl ExtensionBindings {
  pub fn new(
    symbol_resolver: Option<Rc<dyn ExtensionAdapter>>,
    rename_provider: Option<Rc<dyn ExtensionAdapter>>,
  ) -> Self {
    Self {
      symbol_resolver,
      rename_provider,
    }
  }

  /// Pushes `language` through both adapters and runs the load hook of
  /// whatever each one resolves to. Re-selecting the current language is
  /// deliberately not special-cased; the registry already treats it as a
  /// no-op.
  pub fn rebind(&self, language: Option<&LanguageId>) {
    for adapter in [&self.symbol_resolver, &self.rename_provider]
      .into_iter()
      .flatten()
    {
      adapter.set_language(language);
      if let Some(extension) = adapter.extension() {
        extension.load();
      }
    }
  }

  pub fn symbol_resolver(&self) -> Option<Rc<dyn SymbolResolver>> {
    match self.symbol_resolver.as_ref()?.extension()? {
      Extension::SymbolResolver(resolver) => Some(resolver),
      // registry answered with the wrong capability
      _ => None,
    }
  }

  pub fn rename_provider(&self) -> Option<Rc<dyn RenameProvider>> {
    match self.rename_provider.as_ref()?.extension()? {
      Extension::RenameProvider(provider) => Some(provider),
      _ => None,
    }
  }

  /// Drops both adapters. Used on reclamation; a detached binding resolves
  /// nothing.
  pub fn detach(&mut self) {
    self.symbol_resolver = None;
    self.rename_provider = None;
  }
}
