// instances.rs — Instance generation & pruning
//
// Replaces each concrete-but-polymorphic process (whose labels may be
// satisfiable by several competing implementations) with fully-monomorphic
// copies, one per implementation combination needed to exercise every
// relevant implementation at least once. Containers with fan-out are
// covered greedily instead of cross-multiplied.
//
// Preconditions: matching finished; peer lists are symmetric.
// Postconditions: no remaining instance has a replicative receive with
//                 zero peers; peer lists reference instance names only.
// Failure modes: exceeding the configured instance ceiling is fatal and
//                never truncated.
// Side effects: none; the catalog is read-only here.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::config::GenerationConfig;
use crate::error::{EmgError, Result};
use crate::interfaces::{Implementation, InterfaceCatalog};
use crate::matching::ProcessModel;
use crate::process::{ActionKind, Process};

// ── Output ──────────────────────────────────────────────────────────────────

/// A monomorphic process copy: every relevant interface is pinned to one
/// implementation.
#[derive(Debug, Clone)]
pub struct ProcessInstance {
    pub process: Process,
    pub base_name: String,
    /// Interface full id → the implementation this instance exercises.
    pub choices: BTreeMap<String, Implementation>,
}

#[derive(Debug, Default)]
pub struct InstanceModel {
    pub event_instances: Vec<ProcessInstance>,
    pub model_instances: Vec<ProcessInstance>,
}

impl InstanceModel {
    pub fn find(&self, name: &str) -> Option<&ProcessInstance> {
        self.event_instances
            .iter()
            .chain(self.model_instances.iter())
            .find(|i| i.process.name == name)
    }
}

// ── Entry point ─────────────────────────────────────────────────────────────

pub fn generate_instances(
    catalog: &InterfaceCatalog,
    model: ProcessModel,
    config: &GenerationConfig,
) -> Result<InstanceModel> {
    let mut instances = InstanceModel::default();

    for process in model.event_processes {
        let maps = implementation_maps(catalog, &process, config)?;
        if maps.len() > config.max_instances {
            return Err(EmgError::Capacity {
                process: process.name.clone(),
                requested: maps.len(),
                limit: config.max_instances,
            });
        }
        let base_name = process.name.clone();
        for (ordinal, choices) in maps.into_iter().enumerate() {
            let mut copy = process.clone();
            copy.name = format!("{base_name}_{ordinal}");
            instances.event_instances.push(ProcessInstance {
                process: copy,
                base_name: base_name.clone(),
                choices,
            });
        }
    }

    // Kernel-function models are monomorphic by construction: one instance,
    // original name kept (it must match the modeled function).
    for process in model.model_processes {
        let base_name = process.name.clone();
        let choices = single_map(catalog, &process)?;
        instances.model_instances.push(ProcessInstance {
            process,
            base_name,
            choices,
        });
    }

    remap_peers(&mut instances);
    if config.delete_unregistered_processes {
        prune_unregisterable(&mut instances);
    }
    Ok(instances)
}

// ── Access collection ───────────────────────────────────────────────────────

/// Every interface traversed by any access of the process, with its
/// candidate implementations ordered by (value, file).
fn access_interfaces(
    catalog: &InterfaceCatalog,
    process: &Process,
) -> Result<BTreeMap<String, Vec<Implementation>>> {
    let mut result: BTreeMap<String, Vec<Implementation>> = BTreeMap::new();
    for action in process.actions.values() {
        let mut expressions: Vec<&String> = action.parameters.iter().collect();
        if let ActionKind::Call { callback, .. } = &action.kind {
            expressions.push(callback);
        }
        for expression in expressions {
            for access in process.extended_accesses(catalog, expression)? {
                for interface_id in &access.interfaces {
                    if result.contains_key(interface_id) {
                        continue;
                    }
                    let mut implementations = catalog
                        .get(interface_id)
                        .map(|i| i.implementations.clone())
                        .unwrap_or_default();
                    implementations.sort_by(|a, b| {
                        (&a.value, &a.file).cmp(&(&b.value, &b.file))
                    });
                    result.insert(interface_id.clone(), implementations);
                }
            }
        }
    }
    Ok(result)
}

// ── Option interfaces and greedy covering ───────────────────────────────────

/// A container interface with top-level implementations that fan out into
/// downstream implementation values.
fn option_interfaces(
    catalog: &InterfaceCatalog,
    accesses: &BTreeMap<String, Vec<Implementation>>,
) -> Vec<String> {
    accesses
        .iter()
        .filter(|(id, implementations)| {
            let is_container = catalog.get(id).is_some_and(|i| i.is_container());
            let has_top_level = implementations.iter().any(|i| i.base_value.is_none());
            let has_fanout = accesses.values().flatten().any(|child| {
                child.base_container.as_deref() == Some(id.as_str())
            });
            is_container && has_top_level && has_fanout
        })
        .map(|(id, _)| id.clone())
        .collect()
}

/// Cover the option interface's downstream implementation values with the
/// smallest greedy subset of its top-level implementations. Ties pick the
/// lexicographically first (value, file).
fn cover_option(
    option_id: &str,
    accesses: &BTreeMap<String, Vec<Implementation>>,
) -> Vec<Implementation> {
    let mut universe: BTreeSet<&str> = accesses
        .values()
        .flatten()
        .filter(|i| i.base_container.as_deref() == Some(option_id))
        .map(|i| i.value.as_str())
        .collect();

    let candidates: Vec<&Implementation> = accesses
        .get(option_id)
        .map(|impls| impls.iter().filter(|i| i.base_value.is_none()).collect())
        .unwrap_or_default();

    let mut selected = Vec::new();
    let mut remaining: Vec<&Implementation> = candidates.clone();
    while !universe.is_empty() && !remaining.is_empty() {
        // remaining is (value, file)-sorted, so max_by_key keeps the last
        // maximal element; scan forward instead to keep the first.
        let mut best_index = 0usize;
        let mut best_gain = 0usize;
        for (index, candidate) in remaining.iter().enumerate() {
            let gain = accesses
                .values()
                .flatten()
                .filter(|child| {
                    child.base_container.as_deref() == Some(option_id)
                        && child.base_value.as_deref() == Some(candidate.value.as_str())
                        && universe.contains(child.value.as_str())
                })
                .count();
            if gain > best_gain {
                best_gain = gain;
                best_index = index;
            }
        }
        if best_gain == 0 {
            break;
        }
        let chosen = remaining.remove(best_index);
        let covered: Vec<String> = accesses
            .values()
            .flatten()
            .filter(|child| {
                child.base_container.as_deref() == Some(option_id)
                    && child.base_value.as_deref() == Some(chosen.value.as_str())
            })
            .map(|child| child.value.clone())
            .collect();
        for value in covered {
            universe.remove(value.as_str());
        }
        selected.push(chosen.clone());
    }
    if selected.is_empty() {
        if let Some(first) = candidates.first() {
            selected.push((*first).clone());
        }
    }
    selected
}

// ── Instance maps ───────────────────────────────────────────────────────────

/// Build one implementation choice map per necessary instance.
fn implementation_maps(
    catalog: &InterfaceCatalog,
    process: &Process,
    config: &GenerationConfig,
) -> Result<Vec<BTreeMap<String, Implementation>>> {
    let accesses = access_interfaces(catalog, process)?;
    let options = option_interfaces(catalog, &accesses);

    let mut maps: Vec<BTreeMap<String, Implementation>> = Vec::new();
    if let Some(primary) = options.first() {
        let primary_cover = cover_option(primary, &accesses);
        for implementation in &primary_cover {
            for _ in 0..config.instance_modifier.max(1) {
                let mut map = BTreeMap::new();
                map.insert(primary.clone(), implementation.clone());
                maps.push(map);
            }
        }
        // Other option interfaces reuse their covers cyclically.
        for option in options.iter().skip(1) {
            let cover = cover_option(option, &accesses);
            if cover.is_empty() {
                continue;
            }
            for (index, map) in maps.iter_mut().enumerate() {
                map.insert(option.clone(), cover[index % cover.len()].clone());
            }
        }
    } else {
        let width = resource_width(catalog, &accesses, config);
        for _ in 0..width.max(1) {
            maps.push(BTreeMap::new());
        }
    }

    fulfil_maps(&accesses, &options, &mut maps);
    debug!(process = %process.name, instances = maps.len(), "generated instance maps");
    Ok(maps)
}

/// Without container fan-out the instance count follows the widest resource
/// interface, scaled by the per-implementation factor.
fn resource_width(
    catalog: &InterfaceCatalog,
    accesses: &BTreeMap<String, Vec<Implementation>>,
    config: &GenerationConfig,
) -> usize {
    accesses
        .iter()
        .filter(|(id, _)| catalog.get(id).is_some_and(|i| i.is_resource()))
        .map(|(_, impls)| impls.len() * config.instances_per_resource.max(1))
        .max()
        .unwrap_or(1)
}

/// Assign every access interface in every map, preferring values not yet
/// chosen anywhere, then values compatible with already-chosen container
/// bases; a value left uncovered after both preferences gets a fresh map.
/// Option interfaces are exempt from the extra-map pass: their greedy cover
/// already fixed which of their implementations appear, and containers the
/// cover skipped spring no new downstream values.
fn fulfil_maps(
    accesses: &BTreeMap<String, Vec<Implementation>>,
    options: &[String],
    maps: &mut Vec<BTreeMap<String, Implementation>>,
) {
    let mut chosen_values: BTreeSet<String> = maps
        .iter()
        .flat_map(|m| m.values().map(|i| i.value.clone()))
        .collect();

    for (interface_id, implementations) in accesses {
        if implementations.is_empty() {
            continue;
        }
        for index in 0..maps.len() {
            if maps[index].contains_key(interface_id) {
                continue;
            }
            let base_compatible = |implementation: &Implementation,
                                   map: &BTreeMap<String, Implementation>| {
                match (&implementation.base_container, &implementation.base_value) {
                    (Some(base), Some(base_value)) => map
                        .get(base)
                        .is_none_or(|chosen| &chosen.value == base_value),
                    _ => true,
                }
            };
            let pick = implementations
                .iter()
                .find(|i| !chosen_values.contains(&i.value) && base_compatible(i, &maps[index]))
                .or_else(|| {
                    implementations
                        .iter()
                        .find(|i| base_compatible(i, &maps[index]))
                })
                .or_else(|| implementations.first());
            if let Some(implementation) = pick.cloned() {
                chosen_values.insert(implementation.value.clone());
                maps[index].insert(interface_id.clone(), implementation);
            }
        }
        // Spread coverage: an implementation value no map picked gets an
        // extra instance seeded from the last map.
        if options.iter().any(|option| option == interface_id) {
            continue;
        }
        let uncovered: Vec<Implementation> = implementations
            .iter()
            .filter(|i| !maps.iter().any(|m| {
                m.get(interface_id).is_some_and(|c| c.value == i.value)
            }))
            .filter(|i| {
                i.base_value.is_none()
                    || maps.iter().any(|m| {
                        i.base_container.as_ref().is_none_or(|base| {
                            m.get(base).is_some_and(|c| {
                                Some(&c.value) == i.base_value.as_ref()
                            })
                        })
                    })
            })
            .cloned()
            .collect();
        for implementation in uncovered {
            let mut map = maps.last().cloned().unwrap_or_default();
            chosen_values.insert(implementation.value.clone());
            map.insert(interface_id.clone(), implementation);
            maps.push(map);
        }
    }
}

/// Models take the first implementation of each access interface.
fn single_map(
    catalog: &InterfaceCatalog,
    process: &Process,
) -> Result<BTreeMap<String, Implementation>> {
    let accesses = access_interfaces(catalog, process)?;
    let mut map = BTreeMap::new();
    for (interface_id, implementations) in accesses {
        if let Some(first) = implementations.into_iter().next() {
            map.insert(interface_id, first);
        }
    }
    Ok(map)
}

// ── Peer expansion ──────────────────────────────────────────────────────────

/// Peers were wired between base processes; expand each reference to every
/// instance of the peer process.
fn remap_peers(instances: &mut InstanceModel) {
    let mut by_base: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for instance in instances
        .event_instances
        .iter()
        .chain(instances.model_instances.iter())
    {
        by_base
            .entry(instance.base_name.clone())
            .or_default()
            .push(instance.process.name.clone());
    }
    for instance in instances
        .event_instances
        .iter_mut()
        .chain(instances.model_instances.iter_mut())
    {
        for action in instance.process.actions.values_mut() {
            let mut expanded = Vec::new();
            for peer in action.peers.drain(..) {
                match by_base.get(&peer.process) {
                    Some(names) => {
                        for name in names {
                            expanded.push(crate::process::Peer {
                                process: name.clone(),
                                action: peer.action.clone(),
                            });
                        }
                    }
                    None => expanded.push(peer),
                }
            }
            expanded.dedup();
            action.peers = expanded;
        }
    }
}

// ── Pruning ─────────────────────────────────────────────────────────────────

/// Iteratively remove instances holding a replicative receive with zero
/// peers; removing one can orphan another, so run to a fixed point.
fn prune_unregisterable(instances: &mut InstanceModel) {
    loop {
        let doomed: Vec<String> = instances
            .event_instances
            .iter()
            .filter(|instance| {
                instance.process.actions.values().any(|a| {
                    a.is_replicative_receive() && a.peers.is_empty()
                })
            })
            .map(|instance| instance.process.name.clone())
            .collect();
        if doomed.is_empty() {
            return;
        }
        for name in &doomed {
            warn!(process = %name, "removing unregisterable process");
        }
        instances
            .event_instances
            .retain(|instance| !doomed.contains(&instance.process.name));
        for instance in instances
            .event_instances
            .iter_mut()
            .chain(instances.model_instances.iter_mut())
        {
            for name in &doomed {
                instance.process.forget_peer_process(name);
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
