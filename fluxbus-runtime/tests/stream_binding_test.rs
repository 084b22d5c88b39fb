//! End-to-end tests: plan a stream, bind its edges, and push messages
//! through the bus.

use fluxbus_core::channel::{DirectChannel, MessageChannel, MessageHandler, SubscribableChannel};
use fluxbus_core::{Message, Payload};
use fluxbus_runtime::bus::MessageBus;
use fluxbus_runtime::partition::{PartitionSelector, PartitioningMetadata};
use fluxbus_runtime::plan::{MapPropertiesProvider, StreamRuntimePlanner};
use fluxbus_runtime::properties::{BusPropertiesAccessor, ModuleDeploymentProperties, PropertyBag};
use fluxbus_runtime::transport::{InMemoryTransport, Transport};
use fluxbus_runtime::{BindingRole, Error, StreamDefinition};
use parking_lot::Mutex;
use std::sync::Arc;

struct Collector {
    received: Mutex<Vec<Message>>,
}

impl Collector {
    fn new() -> Arc<Self> {
        Arc::new(Self { received: Mutex::new(Vec::new()) })
    }

    fn count(&self) -> usize {
        self.received.lock().len()
    }
}

impl MessageHandler for Collector {
    fn handle(&self, message: Message) -> fluxbus_core::Result<()> {
        self.received.lock().push(message);
        Ok(())
    }
}

fn bag(entries: &[(&str, &str)]) -> PropertyBag {
    entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn props(entries: &[(&str, &str)]) -> ModuleDeploymentProperties {
    entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn text(content: &str) -> Message {
    Message::new(Payload::Text(content.to_string()))
}

fn started_bus() -> MessageBus {
    let bus = MessageBus::builder(Arc::new(InMemoryTransport::new())).build();
    bus.start().unwrap();
    bus
}

#[test]
fn three_module_pipeline_planning() {
    let provider = MapPropertiesProvider::new()
        .with("time", props(&[("count", "1")]))
        .with("transform", props(&[("count", "1")]))
        .with("log", props(&[("count", "1")]));
    let stream =
        StreamDefinition::from_labels("ticktock", ["time", "transform", "log"]).unwrap();
    let planner = StreamRuntimePlanner::new(stream.clone(), Arc::new(provider));

    let first = planner.plan(&stream.modules()[0]).unwrap();
    assert!(first.consumer_properties().is_empty());
    assert_eq!(first.get("producer.nextModuleCount"), Some("1"));

    let middle = planner.plan(&stream.modules()[1]).unwrap();
    assert_eq!(middle.get("consumer.sequence"), Some("1"));
    assert_eq!(middle.get("consumer.count"), Some("1"));

    let last = planner.plan(&stream.modules()[2]).unwrap();
    assert_eq!(last.get("consumer.sequence"), Some("1"));
    assert_eq!(last.get("consumer.count"), Some("1"));
    assert!(last.producer_properties().is_empty());
}

#[test]
fn partitioned_producer_planning() {
    let provider = MapPropertiesProvider::new()
        .with("source", props(&[("producer.partitionKeyExpression", "payload.id")]))
        .with("sink", props(&[("count", "3")]));
    let stream = StreamDefinition::from_labels("orders", ["source", "sink"]).unwrap();
    let planner = StreamRuntimePlanner::new(stream.clone(), Arc::new(provider));

    let producer = planner.plan(&stream.modules()[0]).unwrap();
    assert_eq!(producer.get("producer.partitionCount"), Some("3"));

    let replica1 = planner.plan(&stream.modules()[1]).unwrap();
    assert_eq!(replica1.get("consumer.partitionIndex"), Some("0"));
    assert_eq!(replica1.get("consumer.sequence"), Some("1"));

    planner.plan(&stream.modules()[1]).unwrap();
    let replica3 = planner.plan(&stream.modules()[1]).unwrap();
    assert_eq!(replica3.get("consumer.partitionIndex"), Some("2"));
}

#[test]
fn invalid_partition_count_is_a_planning_error() {
    let provider = MapPropertiesProvider::new()
        .with("source", props(&[("producer.partitionKeyExpression", "payload.id")]))
        .with("sink", props(&[("count", "1")]));
    let stream = StreamDefinition::from_labels("orders", ["source", "sink"]).unwrap();
    let planner = StreamRuntimePlanner::new(stream.clone(), Arc::new(provider));

    let err = planner.plan(&stream.modules()[0]).unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
    let text = err.to_string();
    assert!(text.contains("count"), "{text}");
    assert!(text.contains("orders.sink"), "{text}");
}

#[test]
fn direct_binding_eligibility_and_veto_planning() {
    let provider = MapPropertiesProvider::new()
        .with("a", props(&[("count", "0")]))
        .with("b", props(&[("count", "0")]));
    let stream = StreamDefinition::from_labels("s", ["a", "b"]).unwrap();
    let planner = StreamRuntimePlanner::new(stream.clone(), Arc::new(provider));
    let planned = planner.plan(&stream.modules()[0]).unwrap();
    assert_eq!(planned.get("producer.directBindingAllowed"), Some("true"));

    let provider = MapPropertiesProvider::new()
        .with("a", props(&[("count", "0"), ("producer.directBindingAllowed", "false")]))
        .with("b", props(&[("count", "0")]));
    let stream = StreamDefinition::from_labels("s", ["a", "b"]).unwrap();
    let planner = StreamRuntimePlanner::new(stream.clone(), Arc::new(provider));
    let planned = planner.plan(&stream.modules()[0]).unwrap();
    assert_eq!(planned.get("producer.directBindingAllowed"), Some("false"));
}

#[test]
fn consumer_then_producer_collapses_to_direct_binding() {
    let bus = started_bus();

    let producer_channel = Arc::new(DirectChannel::new());
    let consumer_channel = Arc::new(DirectChannel::new());
    let collector = Collector::new();
    consumer_channel.subscribe(collector.clone());

    bus.bind_consumer("s.0", consumer_channel.clone(), &bag(&[])).unwrap();
    bus.bind_producer("s.0", producer_channel.clone(), &bag(&[])).unwrap();

    assert!(bus.bindings().find_by_name("s.0", BindingRole::Direct).is_some());
    assert!(bus.bindings().find_by_name("s.0", BindingRole::Producer).is_none());

    // Delivery is synchronous and in-process.
    producer_channel.send(text("tick")).unwrap();
    assert_eq!(collector.count(), 1);
}

#[test]
fn producer_then_consumer_converts_to_direct_binding() {
    let bus = started_bus();

    let producer_channel = Arc::new(DirectChannel::new());
    let consumer_channel = Arc::new(DirectChannel::new());
    let collector = Collector::new();
    consumer_channel.subscribe(collector.clone());

    bus.bind_producer("s.0", producer_channel.clone(), &bag(&[])).unwrap();
    assert!(bus.bindings().find_by_name("s.0", BindingRole::Producer).is_some());

    bus.bind_consumer("s.0", consumer_channel.clone(), &bag(&[])).unwrap();
    assert!(bus.bindings().find_by_name("s.0", BindingRole::Direct).is_some());
    assert!(bus.bindings().find_by_name("s.0", BindingRole::Producer).is_none());

    producer_channel.send(text("tick")).unwrap();
    assert_eq!(collector.count(), 1);
}

#[test]
fn vetoed_producer_never_binds_directly() {
    let bus = started_bus();

    let producer_channel = Arc::new(DirectChannel::new());
    let consumer_channel = Arc::new(DirectChannel::new());
    let collector = Collector::new();
    consumer_channel.subscribe(collector.clone());

    bus.bind_consumer("s.0", consumer_channel.clone(), &bag(&[])).unwrap();
    bus.bind_producer(
        "s.0",
        producer_channel.clone(),
        &bag(&[("directBindingAllowed", "false")]),
    )
    .unwrap();

    assert!(bus.bindings().find_by_name("s.0", BindingRole::Direct).is_none());
    assert!(bus.bindings().find_by_name("s.0", BindingRole::Producer).is_some());

    // Messages still flow, through the transport edge.
    producer_channel.send(text("tick")).unwrap();
    assert_eq!(collector.count(), 1);
}

#[test]
fn named_channels_are_never_bound_directly() {
    let bus = started_bus();

    let producer_channel = Arc::new(DirectChannel::new());
    let consumer_channel = Arc::new(DirectChannel::new());
    let collector = Collector::new();
    consumer_channel.subscribe(collector.clone());

    bus.bind_consumer("queue:orders", consumer_channel.clone(), &bag(&[])).unwrap();
    bus.bind_producer("queue:orders", producer_channel.clone(), &bag(&[])).unwrap();

    assert!(bus.bindings().find_by_name("queue:orders", BindingRole::Direct).is_none());
    producer_channel.send(text("order")).unwrap();
    assert_eq!(collector.count(), 1);
}

#[test]
fn consumer_unbind_reverts_direct_binding() {
    let bus = started_bus();

    let producer_channel = Arc::new(DirectChannel::new());
    let consumer_channel = Arc::new(DirectChannel::new());
    let collector = Collector::new();
    consumer_channel.subscribe(collector.clone());

    bus.bind_consumer("s.0", consumer_channel.clone(), &bag(&[])).unwrap();
    bus.bind_producer("s.0", producer_channel.clone(), &bag(&[])).unwrap();
    assert!(bus.bindings().find_by_name("s.0", BindingRole::Direct).is_some());

    bus.unbind_consumer("s.0", consumer_channel.as_ref()).unwrap();

    // The producer is back on the transport; the direct record is gone.
    assert!(bus.bindings().find_by_name("s.0", BindingRole::Direct).is_none());
    assert!(bus.bindings().find_by_name("s.0", BindingRole::Producer).is_some());
    assert!(bus.bindings().find_by_name("s.0", BindingRole::Consumer).is_none());

    // With no consumer bound, the edge rejects sends.
    assert!(producer_channel.send(text("tick")).is_err());
    assert_eq!(collector.count(), 0);
}

#[test]
fn rebinding_a_consumer_after_revert_collapses_again() {
    let bus = started_bus();

    let producer_channel = Arc::new(DirectChannel::new());
    let consumer_channel = Arc::new(DirectChannel::new());
    let collector = Collector::new();
    consumer_channel.subscribe(collector.clone());

    bus.bind_consumer("s.0", consumer_channel.clone(), &bag(&[])).unwrap();
    bus.bind_producer("s.0", producer_channel.clone(), &bag(&[])).unwrap();
    bus.unbind_consumer("s.0", consumer_channel.as_ref()).unwrap();

    let second_consumer = Arc::new(DirectChannel::new());
    let second_collector = Collector::new();
    second_consumer.subscribe(second_collector.clone());
    bus.bind_consumer("s.0", second_consumer.clone(), &bag(&[])).unwrap();

    assert!(bus.bindings().find_by_name("s.0", BindingRole::Direct).is_some());
    producer_channel.send(text("tick")).unwrap();
    assert_eq!(second_collector.count(), 1);
}

#[test]
fn unbind_producers_covers_direct_bindings() {
    let bus = started_bus();

    let producer_channel = Arc::new(DirectChannel::new());
    let consumer_channel = Arc::new(DirectChannel::new());
    consumer_channel.subscribe(Collector::new());

    bus.bind_consumer("s.0", consumer_channel.clone(), &bag(&[])).unwrap();
    bus.bind_producer("s.0", producer_channel.clone(), &bag(&[])).unwrap();
    assert!(bus.bindings().find_by_name("s.0", BindingRole::Direct).is_some());

    bus.unbind_producers("s.0").unwrap();
    assert!(bus.bindings().find_by_name("s.0", BindingRole::Direct).is_none());
    assert_eq!(bus.bindings().find_all("s.0").len(), 1);
}

#[test]
fn dynamic_producer_bind_is_idempotent() {
    let bus = started_bus();

    let first = bus.bind_dynamic_producer("taps.ticktock", &bag(&[])).unwrap();
    let second = bus.bind_dynamic_producer("taps.ticktock", &bag(&[])).unwrap();

    assert_eq!(first.id(), second.id());
    assert_eq!(bus.bindings().find_all("taps.ticktock").len(), 1);
}

struct RefusingTransport;

impl Transport for RefusingTransport {
    fn bind_producer(
        &self,
        name: &str,
        _channel: Arc<dyn SubscribableChannel>,
        _properties: &BusPropertiesAccessor,
    ) -> fluxbus_runtime::Result<Box<dyn fluxbus_runtime::binding::BindingEndpoint>> {
        Err(Error::Binding { name: name.to_string(), message: "transport refused".to_string() })
    }

    fn bind_consumer(
        &self,
        name: &str,
        _channel: Arc<dyn MessageChannel>,
        _properties: &BusPropertiesAccessor,
    ) -> fluxbus_runtime::Result<Box<dyn fluxbus_runtime::binding::BindingEndpoint>> {
        Err(Error::Binding { name: name.to_string(), message: "transport refused".to_string() })
    }

    fn bind_pubsub_producer(
        &self,
        name: &str,
        _channel: Arc<dyn SubscribableChannel>,
        _properties: &BusPropertiesAccessor,
    ) -> fluxbus_runtime::Result<Box<dyn fluxbus_runtime::binding::BindingEndpoint>> {
        Err(Error::Binding { name: name.to_string(), message: "transport refused".to_string() })
    }

    fn bind_pubsub_consumer(
        &self,
        name: &str,
        _channel: Arc<dyn MessageChannel>,
        _properties: &BusPropertiesAccessor,
    ) -> fluxbus_runtime::Result<Box<dyn fluxbus_runtime::binding::BindingEndpoint>> {
        Err(Error::Binding { name: name.to_string(), message: "transport refused".to_string() })
    }
}

#[test]
fn failed_dynamic_bind_tears_the_channel_down() {
    let bus = MessageBus::builder(Arc::new(RefusingTransport)).build();
    bus.start().unwrap();

    let first = bus.bind_dynamic_producer("taps.broken", &bag(&[]));
    assert!(matches!(first, Err(Error::Binding { .. })));
    assert!(bus.bindings().is_empty());

    // The registration did not leak: a second attempt fails the same way
    // instead of returning a stale channel.
    let second = bus.bind_dynamic_producer("taps.broken", &bag(&[]));
    assert!(matches!(second, Err(Error::Binding { .. })));
}

#[test]
fn pubsub_edges_fan_out_and_skip_direct_binding() {
    let bus = started_bus();

    let producer_channel = Arc::new(DirectChannel::new());
    let first_consumer = Arc::new(DirectChannel::new());
    let second_consumer = Arc::new(DirectChannel::new());
    let first = Collector::new();
    let second = Collector::new();
    first_consumer.subscribe(first.clone());
    second_consumer.subscribe(second.clone());

    bus.bind_pubsub_consumer("topic:alerts", first_consumer.clone(), &bag(&[])).unwrap();
    bus.bind_pubsub_consumer("topic:alerts", second_consumer.clone(), &bag(&[])).unwrap();
    bus.bind_pubsub_producer("topic:alerts", producer_channel.clone(), &bag(&[])).unwrap();

    assert!(bus.bindings().find_by_name("topic:alerts", BindingRole::Direct).is_none());

    producer_channel.send(text("alert")).unwrap();
    assert_eq!(first.count(), 1);
    assert_eq!(second.count(), 1);
}

#[test]
fn partition_routing_is_deterministic_and_in_range() {
    let bus = started_bus();
    let meta = PartitioningMetadata::from_accessor(&BusPropertiesAccessor::new(bag(&[
        ("partitionKeyExpression", "payload"),
        ("partitionCount", "4"),
    ])));

    let message = text("abc");
    let first = bus.determine_partition(&message, &meta).unwrap();
    let second = bus.determine_partition(&message, &meta).unwrap();
    assert_eq!(first, second);
    assert!(first < 4);

    let routed = bus.apply_partition_routing(&message, &meta).unwrap();
    assert_eq!(routed.header("partition"), Some(first.to_string().as_str()));
}

struct NegativeSelector;

impl PartitionSelector for NegativeSelector {
    fn select_partition(&self, _key: &serde_json::Value, _partition_count: u32) -> i32 {
        -3
    }
}

#[test]
fn negative_selector_results_are_folded() {
    let bus = started_bus();
    bus.strategies().register_selector("negative", Arc::new(NegativeSelector));

    let meta = PartitioningMetadata::from_accessor(&BusPropertiesAccessor::new(bag(&[
        ("partitionKeyExpression", "payload"),
        ("partitionSelectorClass", "negative"),
        ("partitionCount", "4"),
    ])));

    let partition = bus.determine_partition(&text("abc"), &meta).unwrap();
    assert_eq!(partition, 3);
}

#[test]
fn unknown_selector_name_fails_resolution() {
    let bus = started_bus();
    let meta = PartitioningMetadata::from_accessor(&BusPropertiesAccessor::new(bag(&[
        ("partitionKeyExpression", "payload"),
        ("partitionSelectorClass", "nowhere"),
        ("partitionCount", "4"),
    ])));

    let err = bus.determine_partition(&text("abc"), &meta).unwrap_err();
    assert!(matches!(err, Error::StrategyResolution { .. }));
}

#[test]
fn missing_partition_key_is_rejected() {
    let bus = started_bus();
    let meta = PartitioningMetadata::from_accessor(&BusPropertiesAccessor::new(bag(&[(
        "partitionCount",
        "4",
    )])));

    let err = bus.determine_partition(&text("abc"), &meta).unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
}

#[test]
fn stop_all_stops_every_binding() {
    let bus = started_bus();

    let producer_channel = Arc::new(DirectChannel::new());
    let consumer_channel = Arc::new(DirectChannel::new());
    consumer_channel.subscribe(Collector::new());

    bus.bind_consumer("s.0", consumer_channel.clone(), &bag(&[])).unwrap();
    bus.bind_producer("s.1", producer_channel.clone(), &bag(&[])).unwrap();

    bus.stop_all();
    for binding in [
        bus.bindings().find_by_name("s.0", BindingRole::Consumer).unwrap(),
        bus.bindings().find_by_name("s.1", BindingRole::Producer).unwrap(),
    ] {
        assert_eq!(binding.state(), fluxbus_runtime::BindingState::Stopped);
    }
}

#[test]
fn planned_properties_bind_cleanly() {
    let provider = MapPropertiesProvider::new()
        .with("time", props(&[("count", "1")]))
        .with("log", props(&[("count", "1")]));
    let stream = StreamDefinition::from_labels("ticktock", ["time", "log"]).unwrap();
    let planner = StreamRuntimePlanner::new(stream.clone(), Arc::new(provider));

    let time = planner.plan(&stream.modules()[0]).unwrap();
    let log = planner.plan(&stream.modules()[1]).unwrap();

    let bus = started_bus();
    let time_out = Arc::new(DirectChannel::new());
    let log_in = Arc::new(DirectChannel::new());
    let collector = Collector::new();
    log_in.subscribe(collector.clone());

    bus.bind_consumer("ticktock.0", log_in.clone(), &log.consumer_properties()).unwrap();
    bus.bind_producer("ticktock.0", time_out.clone(), &time.producer_properties()).unwrap();

    time_out.send(text("08:00")).unwrap();
    assert_eq!(collector.count(), 1);
}
