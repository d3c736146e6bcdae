//! Validated chains of modules.
//!
//! A [`Sequence`] owns its modules in source-to-sink order and the buffers
//! that connect them. Linkage is checked once when the sequence is built and
//! again after every edit, so a running controller never sees a malformed
//! chain.
//!
//! ```text
//!   source ─[b0]─▶ window ─[b1]─▶ picker ─[b2]─▶ sink
//!   source ─[b3]─┐
//!                ├─▶ fan_in ─[b5]─▶ sink
//!   source ─[b4]─┘
//! ```

use crate::buffer::{BufferStats, Capacity, Link};
use crate::error::LinkageError;
use crate::module::{ItemKind, Module, ModuleKind};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// A module plus how to wire it.
pub struct ModuleSpec<T> {
    pub module: Module<T>,
    /// Capacity of the buffer this module writes to. Ignored for sinks.
    pub output: Capacity,
    /// Upstream module names. Empty means "the previous spec" for non-sources.
    pub from: Vec<String>,
}

impl<T> ModuleSpec<T> {
    pub fn new(module: Module<T>, output: Capacity) -> Self {
        Self {
            module,
            output,
            from: Vec::new(),
        }
    }

    /// Terminal module; there is no output buffer to size.
    pub fn sink(module: Module<T>) -> Self {
        Self::new(module, Capacity::Bounded(0))
    }

    pub fn reading_from<I, S>(mut self, upstream: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.from = upstream.into_iter().map(Into::into).collect();
        self
    }
}

/// Ordered, validated chain of modules.
pub struct Sequence<T> {
    modules: Vec<Module<T>>,
}

impl<T: Send + 'static> Sequence<T> {
    /// Wire the specs together and validate the result.
    pub fn build(specs: Vec<ModuleSpec<T>>) -> Result<Self, LinkageError> {
        if specs.is_empty() {
            return Err(LinkageError::Empty);
        }

        let mut index = HashMap::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            if index.insert(spec.module.name().to_string(), i).is_some() {
                return Err(LinkageError::DuplicateName(spec.module.name().to_string()));
            }
        }

        // Upstream indices per spec, resolved before anything is wired.
        let mut upstreams: Vec<Vec<usize>> = Vec::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            let module = &spec.module;
            let resolved = if spec.from.is_empty() {
                if module.kind() == ModuleKind::Source {
                    Vec::new()
                } else if i == 0 {
                    return Err(LinkageError::MissingInput {
                        module: module.name().to_string(),
                    });
                } else {
                    vec![i - 1]
                }
            } else {
                if module.kind() == ModuleKind::Source {
                    return Err(LinkageError::SourceWithInput {
                        module: module.name().to_string(),
                    });
                }
                spec.from
                    .iter()
                    .map(|name| {
                        index
                            .get(name)
                            .copied()
                            .ok_or_else(|| LinkageError::UnknownModule(name.clone()))
                    })
                    .collect::<Result<Vec<_>, _>>()?
            };

            for &up in &resolved {
                if specs[up].module.kind() == ModuleKind::Sink {
                    return Err(LinkageError::SinkWithOutput {
                        module: specs[up].module.name().to_string(),
                        downstream: module.name().to_string(),
                    });
                }
            }
            upstreams.push(resolved);
        }

        let links: Vec<Option<Link<T>>> = specs
            .iter()
            .map(|spec| {
                spec.module
                    .kind()
                    .has_output()
                    .then(|| Link::new(spec.output))
            })
            .collect();

        let mut modules = Vec::with_capacity(specs.len());
        for ((spec, ups), output) in specs.into_iter().zip(&upstreams).zip(&links) {
            let mut module = spec.module;
            let inputs = ups
                .iter()
                .filter_map(|&up| links[up].clone())
                .collect();
            module.set_inputs(inputs);
            module.set_output(output.clone());
            modules.push(module);
        }

        let sequence = Self { modules };
        sequence.validate()?;
        info!(
            modules = sequence.modules.len(),
            order = %sequence.names().join(" → "),
            "Sequence built"
        );
        Ok(sequence)
    }

    /// Check every linkage rule against the current wiring.
    pub fn validate(&self) -> Result<(), LinkageError> {
        if self.modules.is_empty() {
            return Err(LinkageError::Empty);
        }

        let mut names = HashSet::with_capacity(self.modules.len());
        for module in &self.modules {
            if !names.insert(module.name()) {
                return Err(LinkageError::DuplicateName(module.name().to_string()));
            }
        }

        if !self.modules.iter().any(|m| m.kind() == ModuleKind::Source) {
            return Err(LinkageError::NoSource);
        }
        if !self.modules.iter().any(|m| m.kind() == ModuleKind::Sink) {
            return Err(LinkageError::NoSink);
        }

        // Buffer id -> index of the module writing to it.
        let mut producer_of: HashMap<u64, usize> = HashMap::new();
        for (i, module) in self.modules.iter().enumerate() {
            let invalid = |reason: String| LinkageError::InvalidConfig {
                module: module.name().to_string(),
                reason,
            };
            module.config().check().map_err(invalid)?;
            if let Some(spec) = module.window_spec() {
                spec.check().map_err(invalid)?;
            }

            match (module.kind().has_output(), module.output()) {
                (true, Some(link)) => {
                    if link.capacity() == 0 {
                        return Err(invalid(
                            "output buffer has zero capacity and can never accept an item"
                                .to_string(),
                        ));
                    }
                    if producer_of.insert(link.id(), i).is_some() {
                        return Err(LinkageError::SharedOutput {
                            module: module.name().to_string(),
                        });
                    }
                }
                (true, None) => {
                    return Err(LinkageError::DanglingOutput {
                        module: module.name().to_string(),
                    })
                }
                (false, Some(_)) => {
                    return Err(LinkageError::SinkWithOutput {
                        module: module.name().to_string(),
                        downstream: "<unwired buffer>".to_string(),
                    })
                }
                (false, None) => {}
            }
        }

        let mut consumer_of: HashMap<u64, usize> = HashMap::new();
        let mut emits: Vec<Option<ItemKind>> = Vec::with_capacity(self.modules.len());

        for (i, module) in self.modules.iter().enumerate() {
            let name = module.name().to_string();
            let inputs = module.inputs();

            match module.kind() {
                ModuleKind::Source if !inputs.is_empty() => {
                    return Err(LinkageError::SourceWithInput { module: name })
                }
                ModuleKind::Source => {}
                _ if inputs.is_empty() => return Err(LinkageError::MissingInput { module: name }),
                kind if inputs.len() > 1 && !kind.accepts_many_inputs() => {
                    return Err(LinkageError::TooManyInputs {
                        module: name,
                        count: inputs.len(),
                    })
                }
                _ => {}
            }

            let mut inbound = module.accepts();
            for link in inputs {
                let Some(&up) = producer_of.get(&link.id()) else {
                    return Err(LinkageError::MissingInput { module: name });
                };
                if consumer_of.insert(link.id(), i).is_some() {
                    return Err(LinkageError::SharedOutput {
                        module: self.modules[up].name().to_string(),
                    });
                }
                if up >= i {
                    return Err(LinkageError::Cycle {
                        module: name,
                        upstream: self.modules[up].name().to_string(),
                    });
                }
                match (emits[up], inbound) {
                    (Some(upstream_kind), Some(accepted)) if upstream_kind != accepted => {
                        return Err(LinkageError::KindMismatch {
                            upstream: self.modules[up].name().to_string(),
                            module: name,
                            emits: upstream_kind.to_string(),
                            accepts: accepted.to_string(),
                        });
                    }
                    (Some(upstream_kind), None) => inbound = Some(upstream_kind),
                    _ => {}
                }
            }

            let effective = match module.emits() {
                Some(kind) => Some(kind),
                None if module.kind().is_transparent() => inbound,
                None => None,
            };
            emits.push(effective);
        }

        for (id, &producer) in &producer_of {
            if !consumer_of.contains_key(id) {
                return Err(LinkageError::DanglingOutput {
                    module: self.modules[producer].name().to_string(),
                });
            }
        }

        Ok(())
    }

    /// Splice a single-input module into the edge leaving `after`.
    ///
    /// The new module reads the existing buffer (items already queued there
    /// flow through it) and writes to a fresh buffer sized by `spec.output`.
    pub fn insert_after(&mut self, after: &str, spec: ModuleSpec<T>) -> Result<(), LinkageError> {
        let at = self.position(after)?;
        let new_name = spec.module.name().to_string();

        match spec.module.kind() {
            ModuleKind::Source | ModuleKind::Sink | ModuleKind::FanIn => {
                return Err(LinkageError::Unsupported {
                    module: new_name,
                    action: "inserted",
                    reason: format!("{} modules cannot be spliced into an edge", spec.module.kind()),
                })
            }
            _ => {}
        }
        if !spec.from.is_empty() && spec.from != [after] {
            return Err(LinkageError::Unsupported {
                module: new_name,
                action: "inserted",
                reason: format!("an inserted module reads from '{after}' only"),
            });
        }
        let Some(edge) = self.modules[at].output().cloned() else {
            return Err(LinkageError::SinkWithOutput {
                module: after.to_string(),
                downstream: new_name,
            });
        };
        let downstream = self
            .consumer_of(edge.id())
            .ok_or_else(|| LinkageError::DanglingOutput {
                module: after.to_string(),
            })?;

        let fresh = Link::new(spec.output);
        let fresh_id = fresh.id();
        let mut module = spec.module;
        module.set_inputs(vec![edge.clone()]);
        module.set_output(Some(fresh.clone()));
        self.swap_input(downstream, edge.id(), fresh);
        self.modules.insert(at + 1, module);

        if let Err(err) = self.validate() {
            self.modules.remove(at + 1);
            self.swap_input(downstream, fresh_id, edge);
            return Err(err);
        }

        info!(module = %new_name, after = %after, "Module inserted");
        Ok(())
    }

    /// Unsplice a single-input module, reconnecting its neighbours.
    ///
    /// Items already in its output buffer and outputs it was carrying are put
    /// back, in order, ahead of what is still queued on its input. A partial
    /// window is discarded. The detached module is returned.
    pub fn remove(&mut self, name: &str) -> Result<Module<T>, LinkageError> {
        let at = self.position(name)?;
        let target = &self.modules[at];

        let (input, output) = match (target.inputs(), target.output()) {
            ([input], Some(output)) if target.kind() != ModuleKind::Source => {
                (input.clone(), output.clone())
            }
            _ => {
                return Err(LinkageError::Unsupported {
                    module: name.to_string(),
                    action: "removed",
                    reason: format!(
                        "only single-input modules with an output can be unspliced, not {}",
                        target.kind()
                    ),
                })
            }
        };
        let downstream = self
            .consumer_of(output.id())
            .ok_or_else(|| LinkageError::DanglingOutput {
                module: name.to_string(),
            })?;

        let in_flight = output.len() + target.carried();
        let needed = input.len().saturating_add(in_flight);
        if needed > input.capacity() {
            return Err(LinkageError::Unsupported {
                module: name.to_string(),
                action: "removed",
                reason: format!(
                    "{in_flight} in-flight items do not fit the {} free slots of its input; drain first",
                    input.remaining()
                ),
            });
        }

        self.swap_input(downstream, output.id(), input.clone());
        let mut module = self.modules.remove(at);
        if let Err(err) = self.validate() {
            self.modules.insert(at, module);
            self.swap_input(downstream, input.id(), output);
            return Err(err);
        }

        let mut restored = output.lock().drain_all();
        restored.extend(module.take_carry());
        let dropped = module.discard_partial();
        if dropped > 0 {
            warn!(module = %name, dropped, "Partial window discarded on removal");
        }
        debug!(module = %name, restored = restored.len(), "Requeued in-flight items");
        input.lock().requeue_front(restored);

        module.set_inputs(Vec::new());
        module.set_output(None);
        info!(module = %name, "Module removed");
        Ok(module)
    }
}

impl<T> Sequence<T> {
    /// Clear degradation on one module.
    pub fn reset(&mut self, name: &str) -> Result<(), LinkageError> {
        let at = self.position(name)?;
        self.modules[at].reset();
        Ok(())
    }

    /// Clear degradation on every module.
    pub fn reset_all(&mut self) {
        self.modules.iter_mut().for_each(Module::reset);
    }

    pub fn modules_in_order(&self) -> impl Iterator<Item = &Module<T>> {
        self.modules.iter()
    }

    pub(crate) fn modules_mut(&mut self) -> &mut [Module<T>] {
        &mut self.modules
    }

    pub fn module(&self, name: &str) -> Option<&Module<T>> {
        self.modules.iter().find(|m| m.name() == name)
    }

    pub fn module_mut(&mut self, name: &str) -> Option<&mut Module<T>> {
        self.modules.iter_mut().find(|m| m.name() == name)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.modules.iter().map(Module::name).collect()
    }

    /// Every buffer in the sequence, once each.
    pub fn links(&self) -> impl Iterator<Item = &Link<T>> {
        self.modules.iter().filter_map(Module::output)
    }

    /// Output buffer stats keyed by the name of the module writing to it.
    pub fn buffer_stats(&self) -> Vec<(String, BufferStats)> {
        self.modules
            .iter()
            .filter_map(|m| m.output().map(|link| (m.name().to_string(), link.snapshot())))
            .collect()
    }

    /// Visible items across every buffer plus outputs carried inside modules.
    pub fn in_flight(&self) -> usize {
        self.links().map(Link::len).sum::<usize>()
            + self.modules.iter().map(Module::carried).sum::<usize>()
    }

    fn position(&self, name: &str) -> Result<usize, LinkageError> {
        self.modules
            .iter()
            .position(|m| m.name() == name)
            .ok_or_else(|| LinkageError::UnknownModule(name.to_string()))
    }

    fn consumer_of(&self, link_id: u64) -> Option<usize> {
        self.modules
            .iter()
            .position(|m| m.inputs().iter().any(|l| l.id() == link_id))
    }

    /// Replace the input with id `old` on module `at` by `new`.
    fn swap_input(&mut self, at: usize, old: u64, new: Link<T>) {
        let module = &mut self.modules[at];
        let inputs = module
            .inputs()
            .iter()
            .map(|l| if l.id() == old { new.clone() } else { l.clone() })
            .collect();
        module.set_inputs(inputs);
    }
}
