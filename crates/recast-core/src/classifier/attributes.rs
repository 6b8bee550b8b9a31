//! Container-managed transaction attributes.
//!
//! `@TransactionAttribute(TransactionAttributeType.X)` and
//! `@TransactionTimeout(value, unit)` on a class or method map onto one
//! Spring `@Transactional` when every value is a literal constant and the
//! declaration can be proxied.

use std::str::FromStr;
use std::sync::Arc;

use crate::ast::{NodePath, SyntaxNode};
use crate::facts::{annotation_names, MethodInfo};
use crate::symbols::{compact_text, ImportTable};

use super::duration::{convert, DurationValue, TimeUnit};
use super::{ClassificationOutcome, ExtractedParameters, Rule};

const EJB_PACKAGES: &[&str] = &["javax.ejb", "jakarta.ejb", "org.jboss.ejb3.annotation"];

/// Transaction attribute types and the Spring propagation they become.
/// `REQUIRED` is Spring's default and is left out of the output.
const PROPAGATIONS: &[(&str, Option<&str>)] = &[
    ("REQUIRED", None),
    ("REQUIRES_NEW", Some("REQUIRES_NEW")),
    ("MANDATORY", Some("MANDATORY")),
    ("SUPPORTS", Some("SUPPORTS")),
    ("NOT_SUPPORTED", Some("NOT_SUPPORTED")),
    ("NEVER", Some("NEVER")),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributePlan {
    /// Indices, within the modifiers node, of the annotations to drop.
    pub annotations: Vec<usize>,
    pub propagation: Option<String>,
    /// Timeout in seconds.
    pub timeout: Option<DurationValue>,
}

/// A class or method declaration that may carry container attributes.
pub struct AttributeTarget<'a> {
    pub node: &'a Arc<SyntaxNode>,
    pub imports: &'a ImportTable,
    /// Set for methods, `None` for type declarations.
    pub method: Option<&'a MethodInfo>,
    /// The declaration also demarcates programmatically.
    pub has_programmatic_calls: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum AttributeKind {
    Attribute,
    Timeout,
}

/// Classify the container attributes of one declaration; `None` when it
/// carries none.
pub fn classify_attributes(target: &AttributeTarget<'_>) -> Option<ClassificationOutcome> {
    let modifiers_index = target.node.child_index_of_kind("modifiers")?;
    let modifiers = &target.node.children()[modifiers_index];

    let found: Vec<(usize, AttributeKind)> = modifiers
        .children()
        .iter()
        .enumerate()
        .filter_map(|(index, child)| attribute_kind(child, target.imports).map(|kind| (index, kind)))
        .collect();
    let (first, _) = found.first()?;
    let focus: NodePath = vec![modifiers_index, *first];
    let complex = |reason: String| {
        Some(ClassificationOutcome::complex(
            target.node,
            Rule::UnsupportedAttributes,
            reason,
            focus.clone(),
        ))
    };

    if target.has_programmatic_calls {
        return complex("mixed demarcation".to_string());
    }
    if let Some(reason) = unproxyable(target, modifiers) {
        return complex(format!("method cannot be proxied ({reason})"));
    }
    if annotation_names(modifiers).iter().any(|n| n == "Transactional") {
        return complex("already carries @Transactional".to_string());
    }

    let mut plan = AttributePlan {
        annotations: found.iter().map(|(index, _)| *index).collect(),
        propagation: None,
        timeout: None,
    };
    for (index, kind) in &found {
        let annotation = &modifiers.children()[*index];
        let result = match kind {
            AttributeKind::Attribute => propagation(annotation, target.imports).map(|p| plan.propagation = p),
            AttributeKind::Timeout => timeout(annotation, target.imports).map(|t| plan.timeout = Some(t)),
        };
        if let Err(reason) = result {
            return complex(reason);
        }
    }
    Some(ClassificationOutcome::linear(
        target.node,
        Rule::DeclarativeAttributes,
        focus,
        ExtractedParameters::Attributes(plan),
    ))
}

fn attribute_kind(node: &SyntaxNode, imports: &ImportTable) -> Option<AttributeKind> {
    if !matches!(node.kind(), "annotation" | "marker_annotation") {
        return None;
    }
    let name = compact_text(node.child_by_field("name")?);
    let (package, simple) = match name.rsplit_once('.') {
        Some((package, simple)) => (Some(package.to_string()), simple),
        None => (
            imports
                .single
                .get(&name)
                .and_then(|fqn| fqn.rsplit_once('.').map(|(p, _)| p.to_string())),
            name.as_str(),
        ),
    };
    let kind = match simple {
        "TransactionAttribute" => AttributeKind::Attribute,
        "TransactionTimeout" => AttributeKind::Timeout,
        _ => return None,
    };
    match package {
        Some(package) if !EJB_PACKAGES.contains(&package.as_str()) => None,
        _ => Some(kind),
    }
}

fn unproxyable(target: &AttributeTarget<'_>, modifiers: &SyntaxNode) -> Option<&'static str> {
    if let Some(method) = target.method {
        if method.is_constructor {
            return Some("constructor");
        }
        if method.class_final {
            return Some("final class");
        }
    }
    let keywords: Vec<&str> = modifiers
        .children()
        .iter()
        .filter(|c| !c.is_named())
        .map(|c| c.text())
        .collect();
    ["static", "private", "final"].into_iter().find(|k| keywords.contains(k))
}

/// Element value for `key`, or the single unnamed argument for `value`.
fn element<'n>(annotation: &'n SyntaxNode, key: &str) -> Option<&'n Arc<SyntaxNode>> {
    let arguments = annotation.child_by_field("arguments")?;
    for argument in arguments.named_children() {
        if argument.kind() == "element_value_pair" {
            if argument.child_by_field("key").map(|k| k.text()) == Some(key) {
                return argument.child_by_field("value");
            }
        } else if key == "value" {
            return Some(argument);
        }
    }
    None
}

/// Constant name of an enum reference such as `Type.X`, or a statically imported `X`.
fn enum_constant(node: &SyntaxNode, enum_type: &str, imports: &ImportTable) -> Option<String> {
    match node.kind() {
        "field_access" => {
            let object = compact_text(node.child_by_field("object")?);
            if object.rsplit('.').next() != Some(enum_type) {
                return None;
            }
            node.child_by_field("field").map(|f| f.text().to_string())
        }
        "identifier" if imports.imports_member(&[enum_type], node.text()) => Some(node.text().to_string()),
        _ => None,
    }
}

fn propagation(annotation: &SyntaxNode, imports: &ImportTable) -> Result<Option<String>, String> {
    let Some(value) = element(annotation, "value") else {
        return Ok(None);
    };
    let constant = enum_constant(value, "TransactionAttributeType", imports)
        .ok_or_else(|| "non-literal attribute value".to_string())?;
    PROPAGATIONS
        .iter()
        .find(|(name, _)| *name == constant)
        .map(|(_, propagation)| propagation.map(str::to_string))
        .ok_or_else(|| format!("unknown transaction attribute {constant}"))
}

fn timeout(annotation: &SyntaxNode, imports: &ImportTable) -> Result<DurationValue, String> {
    let value = element(annotation, "value").ok_or_else(|| "non-literal attribute value".to_string())?;
    let unit = match element(annotation, "unit") {
        Some(unit) => enum_constant(unit, "TimeUnit", imports)
            .and_then(|name| TimeUnit::from_str(&name).ok())
            .ok_or_else(|| "non-literal attribute value".to_string())?,
        None => TimeUnit::Seconds,
    };
    convert(value, unit, TimeUnit::Seconds).map_err(|e| format!("timeout conversion failed ({e})"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ToSource;
    use crate::classifier::Category;
    use crate::parser::{JavaParser, Parser};
    use pretty_assertions::assert_eq;

    fn classify_method_attributes(imports: &str, annotations: &str) -> Option<ClassificationOutcome> {
        let source = format!(
            "package com.acme;\n{imports}\npublic class Bean {{\n    {annotations}\n    public void run() {{ }}\n}}\n"
        );
        let mut parser = JavaParser::new().unwrap();
        let tree = parser.parse(&source).unwrap();
        let table = ImportTable::from_tree(&tree);
        let mut method = None;
        tree.visit(&mut |node| {
            if node.kind() == "method_declaration" && method.is_none() {
                method = Some(Arc::new(node.clone()));
            }
        });
        let method = method.unwrap();
        classify_attributes(&AttributeTarget {
            node: &method,
            imports: &table,
            method: None,
            has_programmatic_calls: false,
        })
    }

    const EJB: &str = "import javax.ejb.TransactionAttribute;\nimport javax.ejb.TransactionAttributeType;";

    #[test]
    fn literal_attribute_maps_to_propagation() {
        let outcome =
            classify_method_attributes(EJB, "@TransactionAttribute(TransactionAttributeType.REQUIRES_NEW)").unwrap();
        assert_eq!(outcome.category, Category::Linear);
        assert_eq!(outcome.original, "@TransactionAttribute(TransactionAttributeType.REQUIRES_NEW)");
        match outcome.params {
            ExtractedParameters::Attributes(plan) => {
                assert_eq!(plan.propagation.as_deref(), Some("REQUIRES_NEW"));
                assert_eq!(plan.annotations.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn required_is_the_default() {
        let outcome = classify_method_attributes(
            "import static javax.ejb.TransactionAttributeType.*;\nimport javax.ejb.TransactionAttribute;",
            "@TransactionAttribute(REQUIRED)",
        )
        .unwrap();
        assert_eq!(
            outcome.params,
            ExtractedParameters::Attributes(AttributePlan {
                annotations: vec![0],
                propagation: None,
                timeout: None,
            })
        );
    }

    #[test]
    fn timeout_is_converted_to_seconds() {
        let outcome = classify_method_attributes(
            "import org.jboss.ejb3.annotation.TransactionTimeout;\nimport java.util.concurrent.TimeUnit;",
            "@TransactionTimeout(value = 2, unit = TimeUnit.MINUTES)",
        )
        .unwrap();
        match outcome.params {
            ExtractedParameters::Attributes(plan) => assert_eq!(plan.timeout, Some(DurationValue::Literal(120))),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn inexact_timeout_is_complex() {
        let outcome = classify_method_attributes(
            "import org.jboss.ejb3.annotation.TransactionTimeout;\nimport java.util.concurrent.TimeUnit;",
            "@TransactionTimeout(value = 1500, unit = TimeUnit.MILLISECONDS)",
        )
        .unwrap();
        assert_eq!(outcome.category, Category::Complex);
        assert!(outcome.reason.starts_with("timeout conversion failed ("), "{}", outcome.reason);
    }

    #[test]
    fn non_literal_values_are_complex() {
        let outcome = classify_method_attributes(EJB, "@TransactionAttribute(Config.MODE)").unwrap();
        assert_eq!(outcome.reason, "non-literal attribute value");
        assert_eq!(outcome.rule, Rule::UnsupportedAttributes);
    }

    #[test]
    fn foreign_annotations_are_ignored() {
        assert!(classify_method_attributes(
            "import com.other.TransactionAttribute;",
            "@TransactionAttribute(Mode.NEW)"
        )
        .is_none());
        assert!(classify_method_attributes(EJB, "@Deprecated").is_none());
    }

    #[test]
    fn private_methods_are_complex() {
        let source = "package com.acme;\nimport javax.ejb.TransactionAttribute;\n\
                      class Bean { @TransactionAttribute private void run() { } }\n";
        let mut parser = JavaParser::new().unwrap();
        let tree = parser.parse(source).unwrap();
        let table = ImportTable::from_tree(&tree);
        let mut method = None;
        tree.visit(&mut |node| {
            if node.kind() == "method_declaration" {
                method = Some(Arc::new(node.clone()));
            }
        });
        let method = method.unwrap();
        let outcome = classify_attributes(&AttributeTarget {
            node: &method,
            imports: &table,
            method: None,
            has_programmatic_calls: false,
        })
        .unwrap();
        assert_eq!(outcome.reason, "method cannot be proxied (private)");
        assert_eq!(method.to_source().trim(), "@TransactionAttribute private void run() { }");
    }
}
