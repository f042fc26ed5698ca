use super::unit::{ProtocolUnit, UnitContract};
use crate::channel::{Channel, ChannelOptions};
use crate::error::{PipelineError, RouteError};
use crate::event::{EventKind, kinds};
use crate::runtime::EngineHandle;
use ahash::AHashMap;
use std::fmt;
use std::sync::Arc;

/// Ordered stack positions an event of some kind visits, bottom first.
pub type Route = Arc<[usize]>;

/// Kinds every pipeline provides without a unit declaring them.
const VIRTUAL_KINDS: [EventKind; 2] = [&kinds::CHANNEL_INIT, &kinds::CHANNEL_CLOSE];

struct Waypoints {
    kind: EventKind,
    mask: Vec<bool>,
    route: Route,
}

struct PipelineInner {
    name: Arc<str>,
    units: Vec<Arc<dyn ProtocolUnit>>,
    waypoints: AHashMap<&'static str, Waypoints>,
}

/// A validated, ordered stack of protocol units. Position 0 is the bottom.
///
/// Cheap to clone; channels keep one.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

impl Pipeline {
    /// Checks that every required kind is provided by some unit (or is a
    /// specialization of a provided kind) and precomputes waypoint masks.
    pub fn new(
        name: impl Into<Arc<str>>,
        units: Vec<Arc<dyn ProtocolUnit>>,
    ) -> Result<Self, PipelineError> {
        if units.is_empty() {
            return Err(PipelineError::Empty);
        }

        let provided: Vec<EventKind> = units
            .iter()
            .flat_map(|u| u.contract().provided().iter().copied())
            .chain(VIRTUAL_KINDS)
            .collect();

        for unit in &units {
            let contract = unit.contract();
            for &required in contract.required() {
                if !provided.iter().any(|p| required.is_a(p)) {
                    return Err(PipelineError::UnmetRequirement {
                        unit: contract.name().to_string(),
                        required: required.name(),
                    });
                }
            }
        }

        let mut waypoints = AHashMap::new();
        let known = units
            .iter()
            .flat_map(|u| {
                let c = u.contract();
                c.provided().iter().chain(c.accepted()).copied()
            })
            .chain(VIRTUAL_KINDS);
        for kind in known {
            waypoints
                .entry(kind.name())
                .or_insert_with(|| Self::waypoints(&units, kind));
        }

        let name = name.into();
        tracing::debug!(
            pipeline = %name,
            units = units.len(),
            kinds = waypoints.len(),
            "[Pipeline] built"
        );

        Ok(Self {
            inner: Arc::new(PipelineInner {
                name,
                units,
                waypoints,
            }),
        })
    }

    fn waypoints(units: &[Arc<dyn ProtocolUnit>], kind: EventKind) -> Waypoints {
        // Every handler sees its channel open and close.
        let lifecycle = VIRTUAL_KINDS.iter().any(|v| kind.is_a(v));
        let mask: Vec<bool> = units
            .iter()
            .map(|u| lifecycle || u.contract().accepts_kind(kind))
            .collect();
        let route = mask
            .iter()
            .enumerate()
            .filter_map(|(pos, &hit)| hit.then_some(pos))
            .collect();
        Waypoints { kind, mask, route }
    }

    /// Positions visited by `kind`, resolved through the nearest ancestor
    /// that has a waypoint mask.
    pub fn route_for(&self, kind: EventKind) -> Result<Route, RouteError> {
        kind.ancestors()
            .find_map(|k| self.inner.waypoints.get(k.name()))
            .map(|w| w.route.clone())
            .ok_or(RouteError::UnwantedEvent(kind.name()))
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn len(&self) -> usize {
        self.inner.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.units.is_empty()
    }

    pub fn unit(&self, pos: usize) -> Option<&Arc<dyn ProtocolUnit>> {
        self.inner.units.get(pos)
    }

    pub fn units(&self) -> impl Iterator<Item = &UnitContract> + '_ {
        self.inner.units.iter().map(|u| u.contract())
    }

    /// The precomputed mask of `kind` itself, without ancestor fallback.
    pub fn waypoint_mask(&self, kind: EventKind) -> Option<&[bool]> {
        self.inner
            .waypoints
            .get(kind.name())
            .map(|w| w.mask.as_slice())
    }

    /// Every kind that has a waypoint mask.
    pub fn known_types(&self) -> impl Iterator<Item = EventKind> + '_ {
        self.inner.waypoints.values().map(|w| w.kind)
    }

    /// New idle channel on its own scheduler.
    pub fn create_channel(&self, id: impl Into<Arc<str>>, engine: &EngineHandle) -> Channel {
        Channel::new(self.clone(), id.into(), engine, ChannelOptions::default())
    }

    pub fn create_channel_with(
        &self,
        id: impl Into<Arc<str>>,
        engine: &EngineHandle,
        options: ChannelOptions,
    ) -> Channel {
        Channel::new(self.clone(), id.into(), engine, options)
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.inner.name)
            .field("units", &self.units().map(UnitContract::name).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchCtx;
    use crate::event::{Event, EventType};
    use crate::protocol::{Handler, HandlerRef};

    static DATA: EventType = EventType::derived("PipelineTestData", &kinds::SENDABLE);
    static URGENT: EventType = EventType::derived("PipelineTestUrgent", &DATA);
    static ACK: EventType = EventType::derived("PipelineTestAck", &kinds::EVENT);
    static STRAY: EventType = EventType::derived("PipelineTestStray", &kinds::EVENT);

    struct Noop;

    impl Handler for Noop {
        fn handle(&mut self, event: Event, ctx: &mut DispatchCtx<'_>) -> anyhow::Result<()> {
            event.go(ctx)?;
            Ok(())
        }
    }

    struct Unit(UnitContract);

    impl ProtocolUnit for Unit {
        fn contract(&self) -> &UnitContract {
            &self.0
        }

        fn create_handler(&self) -> HandlerRef {
            HandlerRef::for_unit(&self.0, Noop)
        }
    }

    fn unit(contract: UnitContract) -> Arc<dyn ProtocolUnit> {
        Arc::new(Unit(contract))
    }

    fn stack() -> Vec<Arc<dyn ProtocolUnit>> {
        vec![
            unit(UnitContract::new("transport").provides(&DATA).accepts(&ACK)),
            unit(UnitContract::new("middle").accepts(&kinds::EVENT)),
            unit(
                UnitContract::new("app")
                    .requires(&URGENT)
                    .provides(&ACK)
                    .accepts(&DATA),
            ),
        ]
    }

    #[test]
    fn covered_requirements_build() {
        let p = Pipeline::new("ok", stack()).unwrap();
        assert_eq!(p.len(), 3);
        assert_eq!(p.name(), "ok");
        assert!(p.known_types().any(|k| k == &kinds::CHANNEL_INIT));
    }

    #[test]
    fn uncovered_requirement_fails() {
        let units = vec![
            unit(UnitContract::new("a").provides(&ACK)),
            unit(UnitContract::new("b").requires(&DATA)),
        ];
        assert_eq!(
            Pipeline::new("bad", units).unwrap_err(),
            PipelineError::UnmetRequirement {
                unit: "b".into(),
                required: "PipelineTestData"
            }
        );
        assert_eq!(Pipeline::new("none", Vec::new()).unwrap_err(), PipelineError::Empty);
    }

    #[test]
    fn requirement_is_not_met_by_a_specialization() {
        let units = vec![
            unit(UnitContract::new("a").provides(&URGENT)),
            unit(UnitContract::new("b").requires(&DATA)),
        ];
        assert!(Pipeline::new("bad", units).is_err());
    }

    #[test]
    fn routes_follow_accepted_ancestors() {
        let p = Pipeline::new("routes", stack()).unwrap();
        assert_eq!(&*p.route_for(&DATA).unwrap(), &[1, 2]);
        assert_eq!(&*p.route_for(&URGENT).unwrap(), &[1, 2]);
        assert_eq!(&*p.route_for(&ACK).unwrap(), &[0, 1]);
        assert_eq!(p.waypoint_mask(&DATA), Some(&[false, true, true][..]));
        assert!(p.waypoint_mask(&URGENT).is_none());
    }

    #[test]
    fn lifecycle_kinds_visit_every_position() {
        let p = Pipeline::new("routes", stack()).unwrap();
        assert_eq!(&*p.route_for(&kinds::CHANNEL_INIT).unwrap(), &[0, 1, 2]);
        assert_eq!(&*p.route_for(&kinds::CHANNEL_CLOSE).unwrap(), &[0, 1, 2]);
        assert_eq!(p.waypoint_mask(&kinds::CHANNEL_INIT), Some(&[true, true, true][..]));
        assert_eq!(p.waypoint_mask(&ACK), Some(&[true, true, false][..]));
    }

    #[test]
    fn unknown_kind_without_masked_ancestor_is_unwanted() {
        let units = vec![unit(UnitContract::new("a").provides(&DATA).accepts(&DATA))];
        let p = Pipeline::new("narrow", units).unwrap();
        assert_eq!(
            p.route_for(&STRAY).unwrap_err(),
            RouteError::UnwantedEvent("PipelineTestStray")
        );
        assert!(p.route_for(&URGENT).is_ok());
    }
}
