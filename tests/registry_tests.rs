use calcserver::core::{SignalType, SignalValue};
use calcserver::registry::SignalRegistry;

#[test]
fn test_re_resolving_input_keeps_type_and_value() {
    let mut registry = SignalRegistry::new();
    let id = registry
        .resolve_input("A", Some("KKS_001"), Some(SignalType::Integer))
        .unwrap();
    registry.input_mut(id).value = SignalValue::Integer(5);

    let again = registry
        .resolve_input("A", Some("KKS_999"), Some(SignalType::Text))
        .unwrap();
    assert_eq!(again, id);

    let input = registry.input(id);
    assert_eq!(input.signal_type, SignalType::Integer);
    assert_eq!(input.value, SignalValue::Integer(5));
    assert_eq!(input.kks, "KKS_001");
    assert_eq!(registry.input_count(), 1);
}

#[test]
fn test_existing_input_needs_no_type() {
    let mut registry = SignalRegistry::new();
    let id = registry
        .resolve_input("A", None, Some(SignalType::Real))
        .unwrap();
    assert_eq!(registry.resolve_input("A", None, None).unwrap(), id);
}

#[test]
fn test_shared_kks_updates_every_input() {
    let mut registry = SignalRegistry::new();
    let a = registry
        .resolve_input("A", Some("KKS_010"), Some(SignalType::Real))
        .unwrap();
    let b = registry
        .resolve_input("B", Some("KKS_010"), Some(SignalType::Real))
        .unwrap();
    let c = registry
        .resolve_input("C", Some("KKS_011"), Some(SignalType::Real))
        .unwrap();

    let updated = registry.update_kks("KKS_010", &SignalValue::Real(7.5));
    assert_eq!(updated, 2);
    assert_eq!(registry.input(a).value, SignalValue::Real(7.5));
    assert_eq!(registry.input(b).value, SignalValue::Real(7.5));
    assert_eq!(registry.input(c).value, SignalValue::Real(0.0));

    let shared: Vec<_> = registry.inputs_for_kks("KKS_010").collect();
    assert_eq!(shared, vec![a, b]);
    assert_eq!(registry.update_kks("KKS_404", &SignalValue::Integer(1)), 0);
}

#[test]
fn test_coefficient_rows_merge() {
    let mut registry = SignalRegistry::new();
    let id = registry.resolve_coefficient("T", "C1", ["r1"]).unwrap();
    registry.coefficient_mut(id).rows["r1"] = Some(SignalValue::Real(1.0));

    let again = registry.resolve_coefficient("T", "C1", ["r1", "r2"]).unwrap();
    assert_eq!(again, id);

    let rows = &registry.coefficient(id).rows;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows["r1"], Some(SignalValue::Real(1.0)));
    assert_eq!(rows["r2"], None);
}

#[test]
fn test_output_keeps_first_column() {
    let mut registry = SignalRegistry::new();
    let id = registry.resolve_output("OUT1", "O1", "col1").unwrap();
    assert_eq!(registry.resolve_output("OUT1", "O1", "other").unwrap(), id);
    assert_eq!(registry.output(id).column, "col1");

    assert!(registry.resolve_output("OUT1", "O2", "").is_err());
    assert!(registry.resolve_output("", "O2", "c").is_err());
}

#[test]
fn test_scoped_and_unscoped_lookup() {
    let mut registry = SignalRegistry::new();
    let first = registry.resolve_output("OUT1", "O", "c").unwrap();
    let second = registry.resolve_output("OUT2", "O", "c").unwrap();

    assert_eq!(registry.find_output("O", Some("OUT2")), Some(second));
    assert_eq!(registry.find_output("O", Some("OUT3")), None);
    let unscoped = registry.find_output("O", None).unwrap();
    assert!(unscoped == first || unscoped == second);

    registry.resolve_coefficient("T", "K", ["k"]).unwrap();
    assert!(registry.find_coefficient("K", None).is_some());
    assert!(registry.find_coefficient("K", Some("U")).is_none());
}

#[test]
fn test_table_iteration_order() {
    let mut registry = SignalRegistry::new();
    registry.resolve_output("B_TABLE", "x", "x").unwrap();
    registry.resolve_output("A_TABLE", "y", "y").unwrap();
    registry.resolve_output("B_TABLE", "z", "z").unwrap();

    let tables: Vec<(String, Vec<String>)> = registry
        .output_tables()
        .map(|(table, outputs)| (table.to_string(), outputs.map(|o| o.code.clone()).collect()))
        .collect();
    assert_eq!(
        tables,
        vec![
            ("B_TABLE".to_string(), vec!["x".to_string(), "z".to_string()]),
            ("A_TABLE".to_string(), vec!["y".to_string()]),
        ]
    );
}
