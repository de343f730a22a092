//! Stage scheduling: order the actors of one stage so every producer runs
//! before its consumers.
//!
//! Rules enforced:
//! 1. An actor is ready once every producer of every type it consumes has
//!    been scheduled.  Dependencies are tracked per type, not per message.
//! 2. All actors ready at the start of a pass are scheduled in that pass, in
//!    registration order, so identical input gives identical output.
//! 3. A pass that schedules nothing means a cycle; the actors on the
//!    cycle(s) are reported and no partial order is returned.
//!
//! Message types are identified by name.

use std::collections::{BTreeMap, BTreeSet};

use actors::MessageType;
use thiserror::Error;

use crate::registry::RegisteredActor;

/// The ordered actors of a stage plus its derived message sets.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schedule {
    /// Actor names in execution order.
    pub order: Vec<String>,
    /// Consumed types nobody in the stage produces; they must already be on
    /// the bus when the stage starts.
    pub initial: BTreeSet<MessageType>,
    pub consumes: BTreeSet<MessageType>,
    pub produces: BTreeSet<MessageType>,
}

/// The stage cannot be ordered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency cycle between actors: {}", .actors.join(", "))]
pub struct CycleError {
    /// Actors on a cycle, in registration order.
    pub actors: Vec<String>,
}

/// Order `actors` (given in registration order) by producer → consumer
/// dependencies.
///
/// # Errors
/// [`CycleError`] naming every actor that sits on a consume/produce cycle.
pub fn schedule(actors: &[&RegisteredActor]) -> Result<Schedule, CycleError> {
    // -----------------------------------------------------------------------
    // 1. Derived message sets
    // -----------------------------------------------------------------------
    let consumes: BTreeSet<MessageType> = actors
        .iter()
        .flat_map(|a| a.consumes().iter().cloned())
        .collect();
    let produces: BTreeSet<MessageType> = actors
        .iter()
        .flat_map(|a| a.produces().iter().cloned())
        .collect();
    let produced_names: BTreeSet<&str> = produces.iter().map(|t| t.name.as_str()).collect();
    let initial = consumes
        .iter()
        .filter(|t| !produced_names.contains(t.name.as_str()))
        .cloned()
        .collect();

    // -----------------------------------------------------------------------
    // 2. Outstanding producers per type
    // -----------------------------------------------------------------------
    let mut outstanding: BTreeMap<&str, usize> = BTreeMap::new();
    for actor in actors {
        for msg_type in actor.produces() {
            *outstanding.entry(msg_type.name.as_str()).or_insert(0) += 1;
        }
    }

    // -----------------------------------------------------------------------
    // 3. Pass-wise scheduling
    // -----------------------------------------------------------------------
    let mut pending: Vec<&RegisteredActor> = actors.to_vec();
    let mut order = Vec::with_capacity(actors.len());

    while !pending.is_empty() {
        let (ready, blocked): (Vec<&RegisteredActor>, Vec<&RegisteredActor>) =
            pending.into_iter().partition(|actor| {
                actor
                    .consumes()
                    .iter()
                    .all(|t| outstanding.get(t.name.as_str()).copied().unwrap_or(0) == 0)
            });

        if ready.is_empty() {
            return Err(CycleError {
                actors: actors_on_cycles(&blocked),
            });
        }

        for actor in ready {
            order.push(actor.name().to_string());
            for msg_type in actor.produces() {
                if let Some(count) = outstanding.get_mut(msg_type.name.as_str()) {
                    *count = count.saturating_sub(1);
                }
            }
        }
        pending = blocked;
    }

    Ok(Schedule {
        order,
        initial,
        consumes,
        produces,
    })
}

/// Of the actors left when scheduling stalled, those that can reach
/// themselves through producer → consumer edges.  Actors merely waiting
/// downstream of a cycle are not named.
fn actors_on_cycles(blocked: &[&RegisteredActor]) -> Vec<String> {
    let edges: Vec<Vec<usize>> = blocked
        .iter()
        .map(|producer| {
            let produced: BTreeSet<&str> =
                producer.produces().iter().map(|t| t.name.as_str()).collect();
            blocked
                .iter()
                .enumerate()
                .filter(|(_, consumer)| {
                    consumer
                        .consumes()
                        .iter()
                        .any(|t| produced.contains(t.name.as_str()))
                })
                .map(|(i, _)| i)
                .collect()
        })
        .collect();

    (0..blocked.len())
        .filter(|&start| reaches(&edges, start, start))
        .map(|i| blocked[i].name().to_string())
        .collect()
}

fn reaches(edges: &[Vec<usize>], from: usize, target: usize) -> bool {
    let mut seen = vec![false; edges.len()];
    let mut stack = edges[from].clone();
    while let Some(node) = stack.pop() {
        if node == target {
            return true;
        }
        if !seen[node] {
            seen[node] = true;
            stack.extend(edges[node].iter().copied());
        }
    }
    false
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ActorRegistry, RegistryBuilder};
    use actors::mock::MockActor;
    use actors::{ActorMetadata, TagRef};
    use std::sync::Arc;

    fn mt(name: &str) -> MessageType {
        MessageType::new(name, "test")
    }

    fn types(list: &str) -> Vec<MessageType> {
        list.split(',').filter(|t| !t.is_empty()).map(mt).collect()
    }

    /// (name, consumes, produces) in registration order; type lists are
    /// comma separated.
    fn registry(specs: &[(&str, &str, &str)]) -> ActorRegistry {
        let mut builder = RegistryBuilder::new().tag("stage");
        for (name, consumes, produces) in specs {
            let meta = ActorMetadata::new(*name)
                .consumes(types(consumes))
                .produces(types(produces))
                .tags([TagRef::main("stage")]);
            builder = builder.actor(Arc::new(MockActor::new(meta)));
        }
        builder.build().unwrap()
    }

    fn run(registry: &ActorRegistry) -> Result<Schedule, CycleError> {
        let actors: Vec<&RegisteredActor> = registry.actors().iter().collect();
        schedule(&actors)
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn producers_run_before_consumers() {
        // Registered in reverse dependency order on purpose.
        let registry = registry(&[
            ("report", "Plan", ""),
            ("plan", "Facts,Config", "Plan"),
            ("scan", "", "Facts"),
        ]);
        let schedule = run(&registry).unwrap();
        assert_eq!(schedule.order, vec!["scan", "plan", "report"]);
        assert_eq!(schedule.initial, [mt("Config")].into_iter().collect());
    }

    #[test]
    fn every_producer_of_a_type_precedes_its_consumers() {
        //   a   b      (both produce M)
        //    \ /
        //     c        (consumes M, produces N)
        //    / \
        //   d   e      (consume N)
        let registry = registry(&[
            ("d", "N", ""),
            ("a", "", "M"),
            ("c", "M", "N"),
            ("e", "N,M", ""),
            ("b", "", "M"),
        ]);
        let schedule = run(&registry).unwrap();
        assert_eq!(schedule.order.len(), 5);

        for actor in registry.actors() {
            let at = position(&schedule.order, actor.name());
            for consumed in actor.consumes() {
                for producer in registry.actors() {
                    if producer.produces().iter().any(|t| t.name == consumed.name) {
                        assert!(position(&schedule.order, producer.name()) < at);
                    }
                }
            }
        }
        assert!(schedule.initial.is_empty());
    }

    #[test]
    fn ready_actors_keep_registration_order() {
        let registry = registry(&[("z", "", ""), ("m", "", ""), ("a", "", "")]);
        assert_eq!(run(&registry).unwrap().order, vec!["z", "m", "a"]);
    }

    #[test]
    fn initial_types_are_consumed_minus_produced() {
        let registry = registry(&[
            ("a", "X,Y", "Z"),
            ("b", "Z,W", "Y"),
        ]);
        let schedule = run(&registry).unwrap();
        assert_eq!(schedule.initial, [mt("X"), mt("W")].into_iter().collect());
        assert_eq!(schedule.consumes.len(), 4);
        assert_eq!(schedule.produces.len(), 2);
    }

    #[test]
    fn cycle_names_only_the_actors_on_it() {
        // a -> b -> c -> a, plus d waiting downstream and e independent.
        let registry = registry(&[
            ("e", "", ""),
            ("a", "C", "A"),
            ("b", "A", "B"),
            ("c", "B", "C"),
            ("d", "A", ""),
        ]);
        let err = run(&registry).unwrap_err();
        assert_eq!(err.actors, vec!["a", "b", "c"]);
    }

    #[test]
    fn self_consuming_actor_is_a_cycle() {
        let registry = registry(&[("loop", "M", "M")]);
        assert_eq!(run(&registry).unwrap_err().actors, vec!["loop"]);
    }

    #[test]
    fn empty_stage_is_valid() {
        assert_eq!(schedule(&[]).unwrap(), Schedule::default());
    }
}
