use pretty_assertions::assert_eq;
use recast_core::engine::{Change, Pipeline, RunReport, SourceInput, UnitState};
use recast_core::{Category, RecastConfig};

const ORDERS: &str = "shop/src/main/java/com/acme/Orders.java";
const GENERATED: &str = "shop/src/main/java/com/acme/TransactionConfig.java";

const ORDERS_SOURCE: &str = r#"package com.acme;

import javax.annotation.Resource;
import javax.transaction.UserTransaction;

public class Orders {

    @Resource
    private UserTransaction utx;

    public void place(String order) throws Exception {
        try {
            utx.begin();
            save(order);
            utx.commit();
        } catch (Exception e) {
            utx.rollback();
            throw e;
        }
    }

    void save(String order) {
    }
}
"#;

const ORDERS_MIGRATED: &str = r#"package com.acme;

import org.springframework.transaction.annotation.Transactional;

public class Orders {

    @Transactional(rollbackFor = Exception.class)
    public void place(String order) throws Exception {
        save(order);
    }

    void save(String order) {
    }
}
"#;

const BATCH_SOURCE: &str = r#"package com.acme;

import java.util.List;
import javax.annotation.Resource;
import javax.transaction.UserTransaction;

public class Batch {

    @Resource
    private UserTransaction utx;

    public void importAll(List<String> items) throws Exception {
        for (String item : items) {
            utx.begin();
            store(item);
            utx.commit();
        }
    }

    void store(String item) {
    }
}
"#;

fn run(config: RecastConfig, inputs: &[(&str, &str)]) -> RunReport {
    let inputs = inputs
        .iter()
        .map(|(path, text)| SourceInput::new(*path, *text))
        .collect();
    Pipeline::builtin(config).run(inputs).unwrap()
}

fn text<'a>(report: &'a RunReport, path: &str) -> &'a str {
    &report.output(path).unwrap().text
}

/// Feed the outputs of a run back in as the inputs of the next one.
fn rerun(config: RecastConfig, report: &RunReport) -> RunReport {
    let inputs = report
        .outputs
        .iter()
        .map(|o| SourceInput::new(o.path.clone(), o.text.clone()))
        .collect();
    Pipeline::builtin(config).run(inputs).unwrap()
}

#[test]
fn linear_demarcation_becomes_transactional() {
    let report = run(RecastConfig::default(), &[(ORDERS, ORDERS_SOURCE)]);

    assert!(report.success(), "{:?}", report.units);
    assert_eq!(text(&report, ORDERS), ORDERS_MIGRATED);
    assert_eq!(report.output(ORDERS).unwrap().change, Change::Modified);

    let unit = &report.units[0];
    assert_eq!(unit.state, UnitState::Cleaned);
    assert_eq!(unit.disposition, Some(UnitState::Rewritten));
    assert_eq!(unit.outcomes.len(), 1);
    assert_eq!(unit.outcomes[0].declaration, "com.acme.Orders#place");
    assert_eq!(unit.outcomes[0].category, Category::Linear);
    assert!(unit.outcomes[0].applied);

    let stats = &report.stats["programmatic-transactions"];
    assert_eq!(stats.candidates, 1);
    assert_eq!(stats.rewrites, 1);
    assert_eq!(stats.markers, 0);
}

#[test]
fn configuration_class_is_generated_for_the_module() {
    let report = run(RecastConfig::default(), &[(ORDERS, ORDERS_SOURCE)]);

    let generated = report.output(GENERATED).unwrap();
    assert_eq!(generated.change, Change::Generated);
    assert!(generated.text.starts_with("package com.acme;\n"));
    assert!(generated.text.contains("@EnableTransactionManagement"));
    assert!(generated.text.contains("new JtaTransactionManager()"));
    assert_eq!(report.outputs.last().map(|o| o.path.as_path()), Some(std::path::Path::new(GENERATED)));
}

#[test]
fn configuration_is_not_generated_when_disabled_or_present() {
    let config = RecastConfig {
        generate_config: false,
        ..Default::default()
    };
    let report = run(config, &[(ORDERS, ORDERS_SOURCE)]);
    assert!(report.output(GENERATED).is_none());

    let existing = "package com.acme;\n\n\
                    import org.springframework.transaction.annotation.EnableTransactionManagement;\n\n\
                    @EnableTransactionManagement\n\
                    public class AppConfig {\n}\n";
    let report = run(
        RecastConfig::default(),
        &[(ORDERS, ORDERS_SOURCE), ("shop/src/main/java/com/acme/AppConfig.java", existing)],
    );
    assert!(report.output(GENERATED).is_none());
    assert_eq!(text(&report, ORDERS), ORDERS_MIGRATED);
}

#[test]
fn auto_configured_modules_get_no_configuration_class() {
    let properties = "spring.datasource.url=jdbc:h2:mem:shop\n";
    let report = run(
        RecastConfig::default(),
        &[
            (ORDERS, ORDERS_SOURCE),
            ("shop/src/main/resources/application.properties", properties),
        ],
    );
    assert!(report.output(GENERATED).is_none());
    assert_eq!(
        text(&report, "shop/src/main/resources/application.properties"),
        properties
    );
}

#[test]
fn test_resources_only_count_with_test_sources() {
    let test_properties = "shop/src/test/resources/application.properties";
    let properties = "spring.datasource.url=jdbc:h2:mem:shop\n";
    let inputs = [(ORDERS, ORDERS_SOURCE), (test_properties, properties)];

    let report = run(RecastConfig::default(), &inputs);
    assert!(report.output(GENERATED).is_some());
    assert_eq!(text(&report, test_properties), properties);

    let config = RecastConfig {
        include_tests: true,
        ..Default::default()
    };
    let report = run(config, &inputs);
    assert!(report.output(GENERATED).is_none());
}

#[test]
fn flat_layouts_are_rewritten_without_configuration() {
    let report = run(RecastConfig::default(), &[("Orders.java", ORDERS_SOURCE)]);
    assert_eq!(text(&report, "Orders.java"), ORDERS_MIGRATED);
    assert_eq!(report.outputs.len(), 1);
}

#[test]
fn second_run_is_a_no_op() {
    let batch = "shop/src/main/java/com/acme/Batch.java";
    let first = run(RecastConfig::default(), &[(ORDERS, ORDERS_SOURCE), (batch, BATCH_SOURCE)]);
    let second = rerun(RecastConfig::default(), &first);

    assert_eq!(second.checksum(), first.checksum());
    assert_eq!(second.changed().count(), 0);
    assert!(second.success());
}

#[test]
fn loops_are_marked_for_review_once() {
    let path = "shop/src/main/java/com/acme/Batch.java";
    let report = run(RecastConfig::default(), &[(path, BATCH_SOURCE)]);
    let migrated = text(&report, path);

    assert!(migrated.contains("import io.recast.annotations.ManualReview;"), "{migrated}");
    assert!(
        migrated.contains("@ManualReview(category = \"programmatic-transactions\", reason = \"repeated use inside a loop\""),
        "{migrated}"
    );
    // the code itself is left alone, field included
    assert!(migrated.contains("private UserTransaction utx;"));
    assert!(migrated.contains("            utx.begin();\n"));
    assert_eq!(report.units[0].disposition, Some(UnitState::Marked));
    assert_eq!(report.units[0].outcomes[0].category, Category::Complex);
    // nothing was rewritten, so no configuration either
    assert!(report.output(GENERATED).is_none());

    let again = rerun(RecastConfig::default(), &report);
    assert_eq!(text(&again, path).matches("@ManualReview").count(), 1);
}

#[test]
fn inherited_fields_are_migrated_and_removed_across_units() {
    let base = "package com.acme;\n\n\
                import javax.annotation.Resource;\n\
                import javax.transaction.UserTransaction;\n\n\
                public abstract class Base {\n\n    \
                @Resource\n    \
                protected UserTransaction utx;\n\
                }\n";
    let child = "package com.acme.orders;\n\n\
                 import com.acme.Base;\n\n\
                 public class Checkout extends Base {\n\n    \
                 public void pay() throws Exception {\n        \
                 try {\n            \
                 utx.begin();\n            \
                 charge();\n            \
                 utx.commit();\n        \
                 } catch (RuntimeException e) {\n            \
                 utx.rollback();\n            \
                 throw e;\n        \
                 }\n    \
                 }\n\n    \
                 void charge() {\n    \
                 }\n\
                 }\n";
    let base_path = "shop/src/main/java/com/acme/Base.java";
    let child_path = "shop/src/main/java/com/acme/orders/Checkout.java";
    let report = run(RecastConfig::default(), &[(base_path, base), (child_path, child)]);

    let checkout = text(&report, child_path);
    assert!(checkout.contains("    @Transactional\n    public void pay() throws Exception {\n        charge();\n    }"), "{checkout}");
    assert!(checkout.contains("import org.springframework.transaction.annotation.Transactional;"));

    let base = text(&report, base_path);
    assert!(!base.contains("UserTransaction"), "{base}");
    assert!(!base.contains("Resource"), "{base}");
    assert!(base.contains("public abstract class Base {"));

    // the common package of the module's sources
    assert!(report.output(GENERATED).is_some());
}

#[test]
fn fields_still_in_use_are_kept() {
    let source = ORDERS_SOURCE.replace(
        "    void save(String order) {\n    }",
        "    boolean active() throws Exception {\n        return utx.getStatus() == 0;\n    }",
    );
    let report = run(RecastConfig::default(), &[(ORDERS, source.as_str())]);
    let migrated = text(&report, ORDERS);
    assert!(migrated.contains("@Transactional(rollbackFor = Exception.class)"), "{migrated}");
    assert!(migrated.contains("private UserTransaction utx;"));
    assert!(migrated.contains("import javax.transaction.UserTransaction;"));
}

#[test]
fn dead_fields_are_decided_per_class() {
    let batch = "shop/src/main/java/com/acme/Batch.java";
    let report = run(RecastConfig::default(), &[(ORDERS, ORDERS_SOURCE), (batch, BATCH_SOURCE)]);

    assert_eq!(text(&report, ORDERS), ORDERS_MIGRATED);
    let batch_text = text(&report, batch);
    assert!(batch_text.contains("@ManualReview"), "{batch_text}");
    assert!(batch_text.contains("    @Resource\n    private UserTransaction utx;"), "{batch_text}");
    assert!(batch_text.contains("import javax.transaction.UserTransaction;"), "{batch_text}");
}

#[test]
fn translated_exceptions_keep_their_handler() {
    let source = ORDERS_SOURCE.replace("            throw e;", "            throw new IllegalStateException(e);");
    let report = run(RecastConfig::default(), &[(ORDERS, source.as_str())]);

    let migrated = text(&report, ORDERS);
    assert!(
        migrated.contains(
            "    @Transactional(rollbackFor = IllegalStateException.class)\n    \
             public void place(String order) throws Exception {\n        \
             try {\n            \
             save(order);\n        \
             } catch (Exception e) {\n            \
             throw new IllegalStateException(e);\n        \
             }\n    \
             }"
        ),
        "{migrated}"
    );
    assert!(!migrated.contains("UserTransaction"), "{migrated}");
    assert_eq!(report.units[0].outcomes[0].category, Category::Linear);
    assert!(report.units[0].outcomes[0].applied);
}

#[test]
fn mark_only_modules_keep_linear_code() {
    let mut config = RecastConfig::default();
    config.strategies.insert("shop".to_string(), "mark-only".to_string());
    let batch = "shop/src/main/java/com/acme/Batch.java";
    let report = run(config, &[(ORDERS, ORDERS_SOURCE), (batch, BATCH_SOURCE)]);

    assert_eq!(text(&report, ORDERS), ORDERS_SOURCE);
    assert!(!report.units[0].outcomes[0].applied);
    assert!(text(&report, batch).contains("@ManualReview"));
    assert!(report.output(GENERATED).is_none());
}

#[test]
fn skipped_modules_still_contribute_facts() {
    let mut config = RecastConfig::default();
    config.strategies.insert("legacy".to_string(), "skip".to_string());
    let legacy = "legacy/src/main/java/com/acme/Orders.java";
    let report = run(config, &[(legacy, ORDERS_SOURCE)]);

    assert_eq!(text(&report, legacy), ORDERS_SOURCE);
    assert!(report.units[0].outcomes.is_empty());
    assert_eq!(report.units[0].state, UnitState::Cleaned);
    assert_eq!(report.units[0].disposition, Some(UnitState::Untouched));
}

#[test]
fn test_sources_are_left_alone_by_default() {
    let test_path = "shop/src/test/java/com/acme/OrdersIT.java";
    let report = run(RecastConfig::default(), &[(test_path, ORDERS_SOURCE)]);
    assert_eq!(text(&report, test_path), ORDERS_SOURCE);
    assert_eq!(report.changed().count(), 0);

    let config = RecastConfig {
        include_tests: true,
        ..Default::default()
    };
    let report = run(config, &[(test_path, ORDERS_SOURCE)]);
    assert_eq!(text(&report, test_path), ORDERS_MIGRATED);
}

#[test]
fn unparseable_units_keep_their_text() {
    let broken = "shop/src/main/java/com/acme/Broken.java";
    let report = run(
        RecastConfig::default(),
        &[(broken, "public class Broken {\n    void run( {\n}\n"), (ORDERS, ORDERS_SOURCE)],
    );

    assert!(!report.success());
    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].path, std::path::PathBuf::from(broken));
    assert!(failures[0].error.is_some());
    assert_eq!(report.output(broken).unwrap().change, Change::Unchanged);
    // other units are unaffected
    assert_eq!(text(&report, ORDERS), ORDERS_MIGRATED);
}

#[test]
fn recipe_selection_limits_the_run() {
    let config = RecastConfig {
        recipes: vec!["ejb-transaction-attributes".to_string()],
        ..Default::default()
    };
    let report = run(config, &[(ORDERS, ORDERS_SOURCE)]);
    assert_eq!(text(&report, ORDERS), ORDERS_SOURCE);
    assert!(!report.stats.contains_key("programmatic-transactions"));
}

#[test]
fn ejb_attributes_become_transactional() {
    let source = "package com.acme;\n\n\
                  import javax.ejb.TransactionAttribute;\n\
                  import javax.ejb.TransactionAttributeType;\n\n\
                  public class Billing {\n\n    \
                  @TransactionAttribute(TransactionAttributeType.REQUIRES_NEW)\n    \
                  public void bill() {\n    \
                  }\n\
                  }\n";
    let path = "shop/src/main/java/com/acme/Billing.java";
    let report = run(RecastConfig::default(), &[(path, source)]);
    let migrated = text(&report, path);

    assert!(migrated.contains("@Transactional(propagation = Propagation.REQUIRES_NEW)"), "{migrated}");
    assert!(!migrated.contains("TransactionAttribute"), "{migrated}");
    assert!(migrated.contains("import org.springframework.transaction.annotation.Propagation;"));
    assert_eq!(report.units[0].outcomes[0].recipe, "ejb-transaction-attributes");
}
