//! Attribute comparison for import verification and ID-only refresh

use std::fmt::Write as _;

pub use similar::ChangeTag;
use similar::TextDiff;

use crate::state::Attributes;

/// Attributes that are only sometimes persisted and never compared
const TIMEOUTS: &str = "timeouts";

/// Key the flattener uses for the number of top-level attributes
const ROOT_COUNT: &str = "%";

/// Returns true for a `.#` or `.%` key, or the root `%`, recording an empty container
pub fn is_empty_container(key: &str, value: &str) -> bool {
    (key == ROOT_COUNT || key.ends_with(".#") || key.ends_with(".%")) && value == "0"
}

/// Copy of `attributes` without empty container sentinels
pub fn without_empty_containers(attributes: &Attributes) -> Attributes {
    attributes
        .iter()
        .filter(|(k, v)| !is_empty_container(k, v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Remove every key starting with one of `prefixes`
pub fn remove_prefixed(attributes: &mut Attributes, prefixes: &[String]) {
    attributes.retain(|k, _| !prefixes.iter().any(|p| k.starts_with(p.as_str())));
}

/// Remove the `timeouts` block and everything under it
pub fn remove_timeouts(attributes: &mut Attributes) {
    let nested = format!("{}.", TIMEOUTS);
    attributes.retain(|k, _| k != TIMEOUTS && !k.starts_with(&nested));
}

/// Attributes as compared by import verification
///
/// The root `%` counts top-level attributes before anything is stripped, so
/// it is left out as well.
pub fn import_verify_view(attributes: &Attributes, ignore: &[String]) -> Attributes {
    let mut view = without_empty_containers(attributes);
    view.remove(ROOT_COUNT);
    remove_prefixed(&mut view, ignore);
    remove_timeouts(&mut view);
    view
}

/// Attributes that differ between an expected and an actual map
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDiff {
    pub expected: Attributes,
    pub actual: Attributes,
}

impl AttributeDiff {
    /// `key = "value"` lines tagged as expected only, actual only or shared
    pub fn lines(&self) -> Vec<(ChangeTag, String)> {
        let expected = render_lines(&self.expected);
        let actual = render_lines(&self.actual);
        TextDiff::from_lines(&expected, &actual)
            .iter_all_changes()
            .map(|change| (change.tag(), change.to_string()))
            .collect()
    }

    /// Line diff where `-` marks expected values and `+` actual ones
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (tag, line) in self.lines() {
            let _ = write!(out, "{}{}", sign(tag), line);
        }
        out
    }
}

pub fn sign(tag: ChangeTag) -> &'static str {
    match tag {
        ChangeTag::Delete => "-",
        ChangeTag::Insert => "+",
        ChangeTag::Equal => " ",
    }
}

fn render_lines(attributes: &Attributes) -> String {
    let mut out = String::new();
    for (k, v) in attributes {
        let _ = writeln!(out, "{} = {:?}", k, v);
    }
    out
}

/// Compare two attribute maps, keeping only the differing keys on mismatch
pub fn difference(mut expected: Attributes, mut actual: Attributes) -> Option<AttributeDiff> {
    if expected == actual {
        return None;
    }

    let same: Vec<String> = expected
        .iter()
        .filter(|(k, v)| actual.get(*k) == Some(*v))
        .map(|(k, _)| k.clone())
        .collect();
    for k in same {
        expected.remove(&k);
        actual.remove(&k);
    }

    Some(AttributeDiff { expected, actual })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shim::Flatmap;
    use serde_json::json;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_containers_are_dropped() {
        let view = without_empty_containers(&attrs(&[
            ("id", "a"),
            ("tags.%", "0"),
            ("ports.#", "0"),
            ("rules.#", "1"),
            ("%", "0"),
        ]));
        assert_eq!(view, attrs(&[("id", "a"), ("rules.#", "1")]));
    }

    #[test]
    fn import_view_strips_ignored_and_timeouts() {
        let view = import_verify_view(
            &attrs(&[
                ("id", "a"),
                ("password", "secret"),
                ("timeouts", "1"),
                ("timeouts.create", "10m"),
                ("timeoutsx", "kept"),
            ]),
            &["password".to_string()],
        );
        assert_eq!(view, attrs(&[("id", "a"), ("timeoutsx", "kept")]));
    }

    #[test]
    fn timeouts_on_one_side_only_is_not_a_difference() {
        let flatten = |value: serde_json::Value| {
            Flatmap::from_map(value.as_object().unwrap()).into_inner()
        };
        let persisted = flatten(json!({"id": "a", "name": "web", "timeouts": {"create": "10m"}}));
        let imported = flatten(json!({"id": "a", "name": "web"}));

        assert!(
            difference(
                import_verify_view(&persisted, &[]),
                import_verify_view(&imported, &[])
            )
            .is_none()
        );

        let with_password = flatten(json!({"id": "a", "name": "web", "password": "secret"}));
        let ignored = ["password".to_string()];
        assert!(
            difference(
                import_verify_view(&with_password, &ignored),
                import_verify_view(&imported, &ignored)
            )
            .is_none()
        );
        assert!(
            difference(
                import_verify_view(&with_password, &[]),
                import_verify_view(&imported, &[])
            )
            .is_some()
        );
    }

    #[test]
    fn equal_maps_have_no_difference() {
        let a = attrs(&[("id", "a"), ("name", "web")]);
        assert!(difference(a.clone(), a).is_none());
    }

    #[test]
    fn difference_keeps_only_changed_keys() {
        let diff = difference(
            attrs(&[("id", "a"), ("name", "web"), ("size", "1")]),
            attrs(&[("id", "a"), ("name", "api")]),
        )
        .unwrap();

        assert_eq!(diff.expected, attrs(&[("name", "web"), ("size", "1")]));
        assert_eq!(diff.actual, attrs(&[("name", "api")]));

        let rendered = diff.render();
        assert!(rendered.contains("-name = \"web\""));
        assert!(rendered.contains("+name = \"api\""));
        assert!(rendered.contains("-size = \"1\""));

        let lines = diff.lines();
        assert!(lines.contains(&(ChangeTag::Delete, "name = \"web\"\n".to_string())));
        assert!(lines.contains(&(ChangeTag::Insert, "name = \"api\"\n".to_string())));
    }
}
