use compute_forge::model::Parameter;
use compute_forge::params::{ParamErrorKind, evaluate_parameters};

fn param(id: &str, name: &str, expr: &str) -> Parameter {
    Parameter {
        id: id.to_string(),
        name: name.to_string(),
        expr: expr.to_string(),
    }
}

#[test]
fn reference_resolves_through_dependency() {
    let params = vec![param("b", "b", "a+1"), param("a", "a", "2")];
    let eval = evaluate_parameters(&params);
    assert!(eval.is_clean());
    assert_eq!(eval.values["b"], 3.0);
    assert_eq!(eval.values["a"], 2.0);
}

#[test]
fn mutual_reference_is_cyclic_for_both() {
    let params = vec![param("a", "a", "b+1"), param("b", "b", "a+1")];
    let eval = evaluate_parameters(&params);
    assert_eq!(eval.errors["a"], ParamErrorKind::CyclicDependency);
    assert_eq!(eval.errors["b"], ParamErrorKind::CyclicDependency);
    assert!(eval.values.is_empty());
}

#[test]
fn duplicate_names_flag_every_collider() {
    let params = vec![param("1", "x", "1"), param("2", "X", "2"), param("3", "y", "5")];
    let eval = evaluate_parameters(&params);
    assert_eq!(eval.errors["1"], ParamErrorKind::DuplicateName);
    assert_eq!(eval.errors["2"], ParamErrorKind::DuplicateName);
    assert_eq!(eval.values["3"], 5.0);
}

#[test]
fn unknown_identifier_is_reported() {
    let eval = evaluate_parameters(&[param("y", "y", "z*2")]);
    assert_eq!(eval.errors["y"], ParamErrorKind::UnknownReference);
}

#[test]
fn every_parameter_has_value_or_single_error() {
    let params = vec![
        param("a", "a", "4 * (2 + 1)"),
        param("b", "b", "a / 0"),
        param("c", "c", "b + 1"),
        param("d", "d", "a - 2"),
        param("e", "e", ""),
    ];
    let eval = evaluate_parameters(&params);
    for p in &params {
        let has_value = eval.values.contains_key(&p.id);
        let has_error = eval.errors.contains_key(&p.id);
        assert!(has_value ^ has_error, "parameter {} must have exactly one outcome", p.id);
    }
    assert_eq!(eval.values["a"], 12.0);
    assert_eq!(eval.errors["b"], ParamErrorKind::NonFiniteResult);
    assert_eq!(eval.errors["c"], ParamErrorKind::DependencyError);
    assert_eq!(eval.values["d"], 10.0);
    assert_eq!(eval.errors["e"], ParamErrorKind::InvalidExpression);
}

#[test]
fn evaluation_is_idempotent() {
    let params = vec![param("a", "w", "16"), param("b", "h", "w / 2"), param("c", "q", "h + nope")];
    assert_eq!(evaluate_parameters(&params), evaluate_parameters(&params));
}
