/*!
# Tree Builder

Declarative construction of Java nodes. Every rewrite that introduces code goes
through these helpers, so injected fragments are built as structured nodes
shaped like the parser's own output and never spliced in as raw text.

Builders emit the tightest conventional spacing (`a = b`, `f(x, y)`); callers
that insert a node into an existing tree decide its leading whitespace with
[`SyntaxNode::with_leading_prefix`].
*/

use std::sync::Arc;

use super::source_gen::escape_java_string;
use super::SyntaxNode;

/// One `key = value` element of an annotation.
pub type ElementPair = (String, Arc<SyntaxNode>);

/// Node factory used by the rewrite engine and the generated units.
#[derive(Debug, Clone)]
pub struct TreeBuilder {
    marker_name: String,
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self::new("ManualReview")
    }
}

impl TreeBuilder {
    pub fn new(marker_name: impl Into<String>) -> Self {
        Self {
            marker_name: marker_name.into(),
        }
    }

    /// Simple name of the diagnostic marker annotation.
    pub fn marker_name(&self) -> &str {
        &self.marker_name
    }

    /// `@ManualReview(category = "..", reason = "..", original = "..", suggestion = "..")`
    pub fn build_marker(&self, category: &str, reason: &str, original: &str, suggestion: &str) -> Arc<SyntaxNode> {
        Self::annotation(
            &self.marker_name,
            vec![
                ("category".to_string(), Self::string_literal(category)),
                ("reason".to_string(), Self::string_literal(reason)),
                ("original".to_string(), Self::string_literal(original)),
                ("suggestion".to_string(), Self::string_literal(suggestion)),
            ],
        )
    }

    /// A method invocation such as `target(args)` or `a.b.target(args)`.
    pub fn build_call(target: &str, args: Vec<Arc<SyntaxNode>>) -> Arc<SyntaxNode> {
        let mut children = Vec::new();
        let name = match target.rsplit_once('.') {
            Some((receiver, name)) => {
                children.push(field(Self::dotted_expression(receiver), "object"));
                children.push(punct(".", ""));
                name
            }
            None => target,
        };
        children.push(field(Self::identifier(name), "name"));
        children.push(field(Self::argument_list(args), "arguments"));
        Arc::new(SyntaxNode::branch("method_invocation", children))
    }

    pub fn identifier(name: &str) -> Arc<SyntaxNode> {
        Arc::new(SyntaxNode::leaf("identifier", true, "", name))
    }

    pub fn type_identifier(name: &str) -> Arc<SyntaxNode> {
        Arc::new(SyntaxNode::leaf("type_identifier", true, "", name))
    }

    /// `a.b.c` as nested `scoped_identifier` nodes.
    pub fn scoped_identifier(fqn: &str) -> Arc<SyntaxNode> {
        let mut parts = fqn.split('.');
        let mut node = Self::identifier(parts.next().unwrap_or_default());
        for part in parts {
            node = Arc::new(SyntaxNode::branch(
                "scoped_identifier",
                vec![field(node, "scope"), punct(".", ""), field(Self::identifier(part), "name")],
            ));
        }
        node
    }

    /// `a.b.c` as an expression: an identifier or nested `field_access` nodes.
    pub fn dotted_expression(path: &str) -> Arc<SyntaxNode> {
        let mut parts = path.split('.');
        let mut node = Self::identifier(parts.next().unwrap_or_default());
        for part in parts {
            node = Self::field_access_on(node, part);
        }
        node
    }

    /// `Object.field`
    pub fn field_access(object: &str, name: &str) -> Arc<SyntaxNode> {
        Self::field_access_on(Self::identifier(object), name)
    }

    fn field_access_on(object: Arc<SyntaxNode>, name: &str) -> Arc<SyntaxNode> {
        Arc::new(SyntaxNode::branch(
            "field_access",
            vec![field(object, "object"), punct(".", ""), field(Self::identifier(name), "field")],
        ))
    }

    /// `Type.class`
    pub fn class_literal(type_name: &str) -> Arc<SyntaxNode> {
        Arc::new(SyntaxNode::branch(
            "class_literal",
            vec![Self::type_identifier(type_name), punct(".", ""), punct("class", "")],
        ))
    }

    /// A double-quoted literal with `value` escaped.
    pub fn string_literal(value: &str) -> Arc<SyntaxNode> {
        let mut children = vec![punct("\"", "")];
        if !value.is_empty() {
            children.push(Arc::new(SyntaxNode::leaf(
                "string_fragment",
                true,
                "",
                escape_java_string(value),
            )));
        }
        children.push(punct("\"", ""));
        Arc::new(SyntaxNode::branch("string_literal", children))
    }

    /// Decimal literal; negative values become a unary minus expression.
    pub fn integer(value: i64) -> Arc<SyntaxNode> {
        if value < 0 {
            let literal = Arc::new(SyntaxNode::leaf(
                "decimal_integer_literal",
                true,
                "",
                value.unsigned_abs().to_string(),
            ));
            return Arc::new(SyntaxNode::branch(
                "unary_expression",
                vec![field(punct("-", ""), "operator"), field(literal, "operand")],
            ));
        }
        Arc::new(SyntaxNode::leaf("decimal_integer_literal", true, "", value.to_string()))
    }

    /// `left op right`
    pub fn binary(left: Arc<SyntaxNode>, operator: &'static str, right: Arc<SyntaxNode>) -> Arc<SyntaxNode> {
        Arc::new(SyntaxNode::branch(
            "binary_expression",
            vec![
                field(Arc::new(left.with_leading_prefix("")), "left"),
                field(punct(operator, " "), "operator"),
                field(Arc::new(right.with_leading_prefix(" ")), "right"),
            ],
        ))
    }

    /// `(expr)`
    pub fn parenthesized(expr: Arc<SyntaxNode>) -> Arc<SyntaxNode> {
        Arc::new(SyntaxNode::branch(
            "parenthesized_expression",
            vec![punct("(", ""), Arc::new(expr.with_leading_prefix("")), punct(")", "")],
        ))
    }

    /// `{a, b}` for array-valued annotation elements.
    pub fn element_value_array(values: Vec<Arc<SyntaxNode>>) -> Arc<SyntaxNode> {
        let mut children = vec![punct("{", "")];
        for (i, value) in values.into_iter().enumerate() {
            if i > 0 {
                children.push(punct(",", ""));
            }
            let prefix = if i > 0 { " " } else { "" };
            children.push(Arc::new(value.with_leading_prefix(prefix)));
        }
        children.push(punct("}", ""));
        Arc::new(SyntaxNode::branch("element_value_array_initializer", children))
    }

    /// `@Name` or `@Name(k = v, ...)`.
    pub fn annotation(name: &str, pairs: Vec<ElementPair>) -> Arc<SyntaxNode> {
        let name_node = if name.contains('.') {
            Self::scoped_identifier(name)
        } else {
            Self::identifier(name)
        };
        if pairs.is_empty() {
            return Arc::new(SyntaxNode::branch(
                "marker_annotation",
                vec![punct("@", ""), field(name_node, "name")],
            ));
        }

        let mut args = vec![punct("(", "")];
        for (i, (key, value)) in pairs.into_iter().enumerate() {
            if i > 0 {
                args.push(punct(",", ""));
            }
            let key_prefix = if i > 0 { " " } else { "" };
            let key_node = Arc::new(SyntaxNode::leaf("identifier", true, key_prefix, key));
            args.push(Arc::new(SyntaxNode::branch(
                "element_value_pair",
                vec![
                    field(key_node, "key"),
                    punct("=", " "),
                    field(Arc::new(value.with_leading_prefix(" ")), "value"),
                ],
            )));
        }
        args.push(punct(")", ""));

        Arc::new(SyntaxNode::branch(
            "annotation",
            vec![
                punct("@", ""),
                field(name_node, "name"),
                field(Arc::new(SyntaxNode::branch("annotation_argument_list", args)), "arguments"),
            ],
        ))
    }

    /// A `modifiers` node holding the given annotations and keywords.
    pub fn modifiers(children: Vec<Arc<SyntaxNode>>) -> Arc<SyntaxNode> {
        Arc::new(SyntaxNode::branch("modifiers", children))
    }

    /// `import a.b.C;`
    pub fn import(fqn: &str) -> Arc<SyntaxNode> {
        Arc::new(SyntaxNode::branch(
            "import_declaration",
            vec![
                punct("import", ""),
                Arc::new(Self::scoped_identifier(fqn).with_leading_prefix(" ")),
                punct(";", ""),
            ],
        ))
    }

    /// `package a.b;`
    pub fn package(name: &str) -> Arc<SyntaxNode> {
        Arc::new(SyntaxNode::branch(
            "package_declaration",
            vec![
                punct("package", ""),
                Arc::new(Self::scoped_identifier(name).with_leading_prefix(" ")),
                punct(";", ""),
            ],
        ))
    }

    /// `(args)`
    pub fn argument_list(args: Vec<Arc<SyntaxNode>>) -> Arc<SyntaxNode> {
        let mut children = vec![punct("(", "")];
        for (i, arg) in args.into_iter().enumerate() {
            if i > 0 {
                children.push(punct(",", ""));
            }
            let prefix = if i > 0 { " " } else { "" };
            children.push(Arc::new(arg.with_leading_prefix(prefix)));
        }
        children.push(punct(")", ""));
        Arc::new(SyntaxNode::branch("argument_list", children))
    }

    /// `new Type(args)`
    pub fn new_instance(type_name: &str, args: Vec<Arc<SyntaxNode>>) -> Arc<SyntaxNode> {
        Arc::new(SyntaxNode::branch(
            "object_creation_expression",
            vec![
                punct("new", ""),
                field(Arc::new(Self::type_identifier(type_name).with_leading_prefix(" ")), "type"),
                field(Self::argument_list(args), "arguments"),
            ],
        ))
    }

    /// `return expr;`
    pub fn return_statement(expr: Arc<SyntaxNode>) -> Arc<SyntaxNode> {
        Arc::new(SyntaxNode::branch(
            "return_statement",
            vec![punct("return", ""), Arc::new(expr.with_leading_prefix(" ")), punct(";", "")],
        ))
    }

    /// `Type name` inside a parameter list.
    pub fn formal_parameter(type_name: &str, name: &str) -> Arc<SyntaxNode> {
        Arc::new(SyntaxNode::branch(
            "formal_parameter",
            vec![
                field(Self::type_identifier(type_name), "type"),
                field(Arc::new(SyntaxNode::leaf("identifier", true, " ", name)), "name"),
            ],
        ))
    }

    /// A public method at `indent` inside a class body, annotated with
    /// `annotations`, whose body is the single `statement`.
    pub fn method(
        indent: &str,
        annotations: &[&str],
        return_type: &str,
        name: &str,
        params: Vec<Arc<SyntaxNode>>,
        statement: Arc<SyntaxNode>,
    ) -> Arc<SyntaxNode> {
        let line = format!("\n{indent}");
        let mut modifiers = Vec::new();
        for (i, annotation) in annotations.iter().enumerate() {
            let prefix = if i == 0 { "" } else { line.as_str() };
            modifiers.push(Arc::new(Self::annotation(annotation, Vec::new()).with_leading_prefix(prefix)));
        }
        let keyword_prefix = if modifiers.is_empty() { "" } else { line.as_str() };
        modifiers.push(punct("public", keyword_prefix));

        let mut param_children = vec![punct("(", "")];
        for (i, param) in params.into_iter().enumerate() {
            if i > 0 {
                param_children.push(punct(",", ""));
            }
            let prefix = if i > 0 { " " } else { "" };
            param_children.push(Arc::new(param.with_leading_prefix(prefix)));
        }
        param_children.push(punct(")", ""));

        let body = Arc::new(SyntaxNode::branch(
            "block",
            vec![
                punct("{", " "),
                Arc::new(statement.with_leading_prefix(&format!("\n{indent}    "))),
                punct("}", &line),
            ],
        ));

        Arc::new(SyntaxNode::branch(
            "method_declaration",
            vec![
                Self::modifiers(modifiers),
                field(Arc::new(Self::type_identifier(return_type).with_leading_prefix(" ")), "type"),
                field(Arc::new(SyntaxNode::leaf("identifier", true, " ", name)), "name"),
                field(Arc::new(SyntaxNode::branch("formal_parameters", param_children)), "parameters"),
                field(body, "body"),
            ],
        ))
    }

    /// A complete compilation unit holding one public class.
    pub fn compilation_unit(
        package: Option<&str>,
        imports: &[&str],
        annotations: &[&str],
        class_name: &str,
        members: Vec<Arc<SyntaxNode>>,
    ) -> Arc<SyntaxNode> {
        let mut children = Vec::new();
        if let Some(package) = package {
            children.push(Self::package(package));
        }
        let mut sorted: Vec<&str> = imports.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        for (i, fqn) in sorted.iter().enumerate() {
            let prefix = match (i, children.is_empty()) {
                (0, true) => "",
                (0, false) => "\n\n",
                _ => "\n",
            };
            children.push(Arc::new(Self::import(fqn).with_leading_prefix(prefix)));
        }

        let mut modifiers = Vec::new();
        for annotation in annotations {
            let prefix = if modifiers.is_empty() { "" } else { "\n" };
            modifiers.push(Arc::new(Self::annotation(annotation, Vec::new()).with_leading_prefix(prefix)));
        }
        let keyword_prefix = if modifiers.is_empty() { "" } else { "\n" };
        modifiers.push(punct("public", keyword_prefix));

        let mut body = vec![punct("{", " ")];
        for member in members {
            body.push(Arc::new(member.with_leading_prefix("\n\n    ")));
        }
        body.push(punct("}", "\n"));

        let class_prefix = if children.is_empty() { "" } else { "\n\n" };
        let class = SyntaxNode::branch(
            "class_declaration",
            vec![
                Self::modifiers(modifiers),
                punct("class", " "),
                field(Arc::new(SyntaxNode::leaf("identifier", true, " ", class_name)), "name"),
                field(Arc::new(SyntaxNode::branch("class_body", body)), "body"),
            ],
        );
        children.push(Arc::new(class.with_leading_prefix(class_prefix)));
        children.push(Arc::new(SyntaxNode::leaf("eof", false, "\n", "")));

        Arc::new(SyntaxNode::branch("program", children))
    }
}

fn punct(text: &'static str, prefix: &str) -> Arc<SyntaxNode> {
    Arc::new(SyntaxNode::leaf(text, false, prefix, text))
}

fn field(node: Arc<SyntaxNode>, name: &'static str) -> Arc<SyntaxNode> {
    if node.field() == Some(name) {
        return node;
    }
    Arc::new((*node).clone().with_field(Some(name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ToSource;
    use crate::parser::{JavaParser, Parser};
    use pretty_assertions::assert_eq;

    fn reparses(source: &str) {
        let mut parser = JavaParser::new().unwrap();
        parser
            .parse(source)
            .unwrap_or_else(|e| panic!("built source does not parse: {e}\n{source}"));
    }

    #[test]
    fn marker_escapes_original_text() {
        let builder = TreeBuilder::default();
        let marker = builder.build_marker(
            "Complex",
            "repeated use inside a loop",
            "for (int i = 0; i < n; i++) {\n    utx.begin();\n}",
            "Demarcate \"each\" iteration",
        );
        assert_eq!(
            marker.to_source(),
            "@ManualReview(category = \"Complex\", reason = \"repeated use inside a loop\", \
             original = \"for (int i = 0; i < n; i++) {\\n    utx.begin();\\n}\", \
             suggestion = \"Demarcate \\\"each\\\" iteration\")"
        );
        reparses(&format!("class A {{\n    {}\n    void run() {{}}\n}}\n", marker.to_source()));
    }

    #[test]
    fn call_with_receiver_chain() {
        let call = TreeBuilder::build_call("a.b.run", vec![TreeBuilder::integer(3), TreeBuilder::string_literal("x")]);
        assert_eq!(call.to_source(), "a.b.run(3, \"x\")");
        reparses(&format!("class A {{ void f() {{ {}; }} }}", call.to_source()));
    }

    #[test]
    fn annotation_with_array_and_negative_values() {
        let annotation = TreeBuilder::annotation(
            "Transactional",
            vec![
                ("timeout".to_string(), TreeBuilder::integer(-1)),
                (
                    "rollbackFor".to_string(),
                    TreeBuilder::element_value_array(vec![
                        TreeBuilder::class_literal("IOException"),
                        TreeBuilder::class_literal("SQLException"),
                    ]),
                ),
            ],
        );
        assert_eq!(
            annotation.to_source(),
            "@Transactional(timeout = -1, rollbackFor = {IOException.class, SQLException.class})"
        );
        reparses(&format!("class A {{ {} void f() {{}} }}", annotation.to_source()));
    }

    #[test]
    fn generated_unit_is_well_formed() {
        let body = TreeBuilder::return_statement(TreeBuilder::new_instance("JtaTransactionManager", Vec::new()));
        let method = TreeBuilder::method("    ", &["Bean"], "JtaTransactionManager", "transactionManager", Vec::new(), body);
        let unit = TreeBuilder::compilation_unit(
            Some("com.acme"),
            &["org.springframework.context.annotation.Configuration", "org.springframework.context.annotation.Bean"],
            &["Configuration"],
            "TransactionConfig",
            vec![method],
        );
        let source = unit.to_source();
        assert_eq!(
            source,
            "package com.acme;\n\n\
             import org.springframework.context.annotation.Bean;\n\
             import org.springframework.context.annotation.Configuration;\n\n\
             @Configuration\n\
             public class TransactionConfig {\n\n    \
             @Bean\n    \
             public JtaTransactionManager transactionManager() {\n        \
             return new JtaTransactionManager();\n    \
             }\n\
             }\n"
        );
        reparses(&source);
    }
}
