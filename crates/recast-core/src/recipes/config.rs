//! Generated transaction management configuration.

use std::sync::Arc;

use crate::ast::{SyntaxNode, TreeBuilder};
use crate::facts::TxFlavor;

const CONFIGURATION: &str = "org.springframework.context.annotation.Configuration";
const BEAN: &str = "org.springframework.context.annotation.Bean";
const ENABLE_TRANSACTION_MANAGEMENT: &str =
    "org.springframework.transaction.annotation.EnableTransactionManagement";
const JTA_MANAGER: &str = "org.springframework.transaction.jta.JtaTransactionManager";
const JPA_MANAGER: &str = "org.springframework.orm.jpa.JpaTransactionManager";

/// A `@Configuration` class enabling annotation-driven transactions with the
/// manager matching `flavor`. `namespace` is `javax` or `jakarta` and picks
/// the `EntityManagerFactory` package; jakarta when unknown.
pub fn build_config_unit(
    package: Option<&str>,
    class_name: &str,
    flavor: TxFlavor,
    namespace: Option<&str>,
) -> Arc<SyntaxNode> {
    let factory_import;
    let mut imports = vec![CONFIGURATION, BEAN, ENABLE_TRANSACTION_MANAGEMENT];
    let method = match flavor.manager() {
        TxFlavor::ResourceLocal => {
            factory_import = format!("{}.persistence.EntityManagerFactory", namespace.unwrap_or("jakarta"));
            imports.push(JPA_MANAGER);
            imports.push(&factory_import);
            let body = TreeBuilder::return_statement(TreeBuilder::new_instance(
                "JpaTransactionManager",
                vec![TreeBuilder::identifier("entityManagerFactory")],
            ));
            TreeBuilder::method(
                "    ",
                &["Bean"],
                "JpaTransactionManager",
                "transactionManager",
                vec![TreeBuilder::formal_parameter("EntityManagerFactory", "entityManagerFactory")],
                body,
            )
        }
        _ => {
            imports.push(JTA_MANAGER);
            let body = TreeBuilder::return_statement(TreeBuilder::new_instance("JtaTransactionManager", Vec::new()));
            TreeBuilder::method("    ", &["Bean"], "JtaTransactionManager", "transactionManager", Vec::new(), body)
        }
    };

    TreeBuilder::compilation_unit(
        package,
        &imports,
        &["Configuration", "EnableTransactionManagement"],
        class_name,
        vec![method],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ToSource;
    use crate::parser::{JavaParser, Parser};
    use pretty_assertions::assert_eq;

    #[test]
    fn jta_configuration() {
        let unit = build_config_unit(Some("com.acme"), "TransactionConfig", TxFlavor::Container, None);
        let source = unit.to_source();
        assert_eq!(
            source,
            "package com.acme;\n\n\
             import org.springframework.context.annotation.Bean;\n\
             import org.springframework.context.annotation.Configuration;\n\
             import org.springframework.transaction.annotation.EnableTransactionManagement;\n\
             import org.springframework.transaction.jta.JtaTransactionManager;\n\n\
             @Configuration\n\
             @EnableTransactionManagement\n\
             public class TransactionConfig {\n\n    \
             @Bean\n    \
             public JtaTransactionManager transactionManager() {\n        \
             return new JtaTransactionManager();\n    \
             }\n\
             }\n"
        );
        JavaParser::new().unwrap().parse(&source).unwrap();
    }

    #[test]
    fn resource_local_configuration_follows_the_namespace() {
        let source = build_config_unit(None, "TxConfig", TxFlavor::ResourceLocal, Some("javax")).to_source();
        assert!(source.starts_with("import javax.persistence.EntityManagerFactory;\n"));
        assert!(source.contains(
            "public JpaTransactionManager transactionManager(EntityManagerFactory entityManagerFactory) {\n        \
             return new JpaTransactionManager(entityManagerFactory);\n    }"
        ));
        JavaParser::new().unwrap().parse(&source).unwrap();
    }
}
