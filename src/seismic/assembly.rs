//! Building a seismic [`Sequence`] from a [`PipelineConfig`].

use super::{Catalog, CatalogHandle, Demean, SeismicItem, StaLtaPicker, SyntheticFeed, TraceMerge, PICK, TRACE};
use crate::config::{defaults, ConfigError, ModuleEntry, PipelineConfig, TransformKind};
use crate::error::LinkageError;
use crate::module::{Module, ModuleKind};
use crate::sequence::{ModuleSpec, Sequence};
use std::collections::HashMap;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Linkage(#[from] LinkageError),

    #[error("module '{module}': {reason}")]
    Module { module: String, reason: String },
}

/// A built chain plus read handles for its catalogs.
pub struct Assembly {
    pub sequence: Sequence<SeismicItem>,
    /// Catalog handles keyed by sink module name.
    pub catalogs: HashMap<String, CatalogHandle>,
}

impl Assembly {
    /// Handle of the first sink, for single-catalog chains.
    pub fn catalog(&self) -> Option<&CatalogHandle> {
        self.sequence
            .modules_in_order()
            .find(|m| m.kind() == ModuleKind::Sink)
            .and_then(|m| self.catalogs.get(m.name()))
    }
}

/// Validate `config` and turn its `[[module]]` entries into a linked sequence.
pub fn assemble(config: &PipelineConfig) -> Result<Assembly, AssemblyError> {
    config.validate()?;

    let mut catalogs = HashMap::new();
    let mut specs = Vec::with_capacity(config.modules.len());
    let mut sources = 0_u64;

    for entry in &config.modules {
        let module = match entry.kind {
            ModuleKind::Source => {
                let seed = config.seismic.seed.map(|s| s.wrapping_add(sources));
                sources += 1;
                let feed = SyntheticFeed::new(&config.seismic, entry.station(), entry.channel(), seed)
                    .map_err(|e| module_error(entry, e.to_string()))?;
                Module::source(&entry.name, feed).emitting(TRACE)
            }
            ModuleKind::Passthrough => Module::passthrough(&entry.name),
            ModuleKind::Window => Module::window(&entry.name, entry.window_spec(), TraceMerge)
                .accepting(TRACE)
                .emitting(TRACE),
            ModuleKind::Transform => match entry.transform {
                Some(TransformKind::Demean) => Module::transform(&entry.name, Demean)
                    .accepting(TRACE)
                    .emitting(TRACE),
                Some(TransformKind::StaLta) => {
                    Module::transform(&entry.name, StaLtaPicker::new(entry.picker_params()))
                        .accepting(TRACE)
                        .emitting(PICK)
                }
                None => return Err(module_error(entry, "no `transform` selected".to_string())),
            },
            ModuleKind::FanIn => Module::fan_in(&entry.name, entry.merge.unwrap_or_default()),
            ModuleKind::Sink => {
                let catalog = Catalog::new(
                    &entry.name,
                    entry.retain.unwrap_or(defaults::DEFAULT_CATALOG_RETAIN),
                );
                catalogs.insert(entry.name.clone(), catalog.handle());
                Module::sink(&entry.name, catalog)
            }
        }
        .with_config(entry.module_config());

        let spec = if entry.kind == ModuleKind::Sink {
            ModuleSpec::sink(module)
        } else {
            ModuleSpec::new(module, entry.output_capacity())
        };
        specs.push(spec.reading_from(entry.from.iter().cloned()));
    }

    let sequence = Sequence::build(specs)?;
    info!(
        modules = sequence.len(),
        sources,
        sinks = catalogs.len(),
        "Seismic chain assembled"
    );
    Ok(Assembly { sequence, catalogs })
}

fn module_error(entry: &ModuleEntry, reason: String) -> AssemblyError {
    AssemblyError::Module {
        module: entry.name.clone(),
        reason,
    }
}
