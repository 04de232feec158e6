// Matrix Expansion
// Expands a template's matrix axes into concrete binding vectors

use std::collections::BTreeMap;

/// One concrete binding of every matrix axis to a value, in axis order.
pub type AxisBinding = Vec<(String, String)>;

/// Expand matrix axes into the full cross product of bindings.
///
/// Axes iterate in BTreeMap (lexicographic) order and values in declared
/// order, so the result is deterministic: the same template always yields
/// the same bindings in the same order. A template with no axes yields a
/// single empty binding.
pub fn expand_axes(matrix: &BTreeMap<String, Vec<String>>) -> Vec<AxisBinding> {
    let mut combinations: Vec<AxisBinding> = vec![Vec::new()];

    for (axis, values) in matrix {
        let mut next = Vec::with_capacity(combinations.len() * values.len());
        for combo in &combinations {
            for value in values {
                let mut extended = combo.clone();
                extended.push((axis.clone(), value.clone()));
                next.push(extended);
            }
        }
        combinations = next;
    }

    combinations
}

/// Deterministic instance identity for a template name plus binding.
///
/// `name` for an empty binding, `name [k1=v1, k2=v2]` otherwise.
pub fn instance_name(template: &str, binding: &AxisBinding) -> String {
    if binding.is_empty() {
        return template.to_string();
    }
    let parts: Vec<String> = binding.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{} [{}]", template, parts.join(", "))
}
