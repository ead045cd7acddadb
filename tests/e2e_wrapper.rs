//! End-to-end tests for wrapping non-composable host types.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use trait_weave::{
    AccessorTable, Collaborators, Composer, ComposerConfig, Error, FieldType, HostTypeDefinition,
    StorageMode, Value, ViewTypeDefinition,
};

#[derive(Debug, Default, Clone, PartialEq)]
struct Sensor {
    reading: f64,
    label: String,
}

fn setup(logical: bool) -> Composer {
    let accessors = Arc::new(AccessorTable::new());
    let describer = accessors
        .describe::<Sensor>("Sensor")
        .field("reading", FieldType::Float, |s| Value::from(s.reading), |s, v| {
            s.reading = v.try_into()?;
            Ok(())
        })
        .field("label", FieldType::String, |s| Value::from(s.label.as_str()), |s, v| {
            s.label = v.try_into()?;
            Ok(())
        })
        .default_constructible();
    if logical {
        describer.logical().finish();
    } else {
        describer.finish();
    }

    let composer = Composer::new(
        ComposerConfig::default().with_storage_mode(StorageMode::Map),
        Collaborators::in_process(accessors.clone()),
    );
    // declared, but not composable
    composer
        .declare_host(accessors.host_definition("Sensor").unwrap())
        .unwrap();
    composer
        .declare_view(ViewTypeDefinition::new("Calibrated")
            .with_field("reading", FieldType::Float)
            .with_field("offset", FieldType::Float))
        .unwrap();
    composer
}

#[test]
fn test_plain_host_must_be_wrapped() {
    let composer = setup(false);
    let sensor = composer.new_host("Sensor", Sensor::default()).unwrap();
    assert!(!sensor.is_composable());
    assert!(matches!(
        composer.attach_view(&sensor, "Calibrated", false),
        Err(Error::Composition { .. })
    ));
}

#[test]
fn test_wrapper_round_trip() {
    let composer = setup(false);
    let wrapper = composer.wrap_host("Sensor").unwrap();
    assert_eq!(wrapper.core_type(), "Sensor");
    assert_eq!(wrapper.wrapper_type(), "SensorWrapper");
    assert!(wrapper.host().is_composable());

    wrapper.init(Sensor { reading: 3.5, label: "t1".into() }).unwrap();
    let view = composer.attach_view(wrapper.host(), "Calibrated", false).unwrap();

    assert_eq!(view.hard_fields(), vec!["reading"]);
    assert_eq!(view.get("reading").unwrap(), Value::Float(3.5));
    assert_eq!(view.get("offset").unwrap(), Value::Float(0.0));

    view.set("reading", Value::Float(4.0)).unwrap();
    assert_eq!(wrapper.read_core(|s: &Sensor| s.reading), Some(4.0));
    assert_eq!(wrapper.get("reading").unwrap(), view.get("reading").unwrap());
    assert_eq!(wrapper.get("label").unwrap(), Value::from("t1"));
}

#[test]
fn test_wrapper_definition_is_registered() {
    let composer = setup(true);
    let first = composer.wrap_host("Sensor").unwrap();
    let second = composer.wrap_host("Sensor").unwrap();
    assert_ne!(first.host().id(), second.host().id());

    let def: Arc<HostTypeDefinition> = composer.registry().host("SensorWrapper").unwrap();
    assert!(def.composable);
    assert!(def.logical);
    assert_eq!(def.wrapper_of.as_deref(), Some("Sensor"));

    // logical host type: the attach skips the exclusivity check
    let view = composer.attach_view(first.host(), "Calibrated", false).unwrap();
    assert!(view.is_logical());
}

#[test]
fn test_wrap_unknown_type_is_none() {
    let composer = setup(false);
    assert!(composer.wrap_host("Thermostat").is_none());
}
