//! Built-in carrier layouts.
//!
//! Life carriers use ids 1-11. Elementary (premium) feeds are registered as
//! separate carriers with id `100 + n`, so a life and an elementary upload of
//! the same insurer never share aggregation rows.

use super::CarrierMapping;
use crate::aggregation::{
    AggregationProfile, AggregationRule, Formula, SheetFormulas, UmbrellaAdjustment,
};
use crate::schema::{
    Addressing, AgentParseRule, CellPredicate, ColumnSelector, ExtraColumn, ExtraKind, FieldMap,
    FixedAgent, GroupRules, MappingDescriptor, NameCleanup, ParseMode, TextTest, ThreeRowRules,
};
use crate::schema::Category::{self, Financial, Pension, PensionTransfer, Risk};
use std::collections::BTreeMap;

const TOTAL: &str = "סה\"כ";

const REPORT_FOOTER_KEYWORDS: [&str; 5] = [
    "הגדרות",
    "תיאור דוח",
    "המשתמש המייצא",
    "שעת ייצוא",
    "פתח דוח",
];

const AYALON_PRODUCTS: &[(&str, Category)] = &[
    ("ריסק", Risk),
    ("בריאות", Risk),
    ("מחלות קשות", Risk),
    ("נכות", Risk),
    ("שלב", Pension),
    ("פנסיוני", Pension),
    ("פיננסים", Financial),
];

const PHOENIX_PRODUCTS: &[(&str, Category)] = &[
    ("פנסיה", Pension),
    ("מסלול מנהלים", Pension),
    ("אכ\"ע", Pension),
    ("ביטוח חד\"פ", Risk),
    ("סיעוד", Risk),
    ("משכנתא", Risk),
    ("תאונות אישיות", Risk),
    ("ריסק- מסלול מנהלים", Risk),
    ("בריאות פרט", Risk),
    ("מוות וניכויות", Risk),
    ("מחלות קשות", Risk),
    ("ריסק-פרטי", Risk),
    ("ריסק פרט", Risk),
    ("אקסלנט", Financial),
    ("מסלול פרט", Financial),
    ("מסלול פרט חד\"פ", Financial),
    ("חסכון מסלול מנהלים", Financial),
    ("גמל", Financial),
    ("גמל העברות", Financial),
    ("מסלול זמן פרישה", Financial),
    ("מסלול לזמן פרישה", Financial),
    ("אינווסט ח\"פ", Financial),
    ("ניוד פנסיה", PensionTransfer),
    ("מסלול ניוד מנהלים", PensionTransfer),
    ("פנסיה העברות", PensionTransfer),
    ("בסיס זיכוי ניוד פנסיה העברה", PensionTransfer),
    ("בסיס זיכוי ניוד פנסיה  העברה", PensionTransfer),
];

const MIGDAL_PRODUCTS: &[(&str, Category)] = &[
    ("בסיס זיכוי לפנסיה רובד א` לגיל 60", Pension),
    ("בסיס זיכוי ביטוח מנהלים עצמאים פרט (ללא מגדלור פרט חיסכון)", Pension),
    ("בסיס זיכוי לפנסיה רובד א` גיל בין 60-65", Pension),
    ("בסיס זיכוי ביטוח מנהלים ,עצמאים,פרט (ללא מגדלור פרט חיסכון)", Pension),
    ("בסיס זיכוי ניוד פנסיה (עד גיל 60)", PensionTransfer),
    ("בסיס זיכוי ניוד פנסיה - גיל 60-65", PensionTransfer),
    ("בסיס זיכוי ריסק כולל הגדלות", Risk),
    ("בסיס זיכוי בריאות וריסק (סיעוד 40% )", Risk),
    ("בסיס זיכוי קשת שוטף ללא פרמית מינימום", Financial),
    ("בסיס זיכוי בגין הפקדות חד פעמיות בקשת", Financial),
    ("בסיס זיכוי מוצרים פיננסים", Financial),
    ("בסיס זיכוי בגין ניודים וחד פעמי ביטוח חיים", Financial),
    ("בסיס זיכוי ניוד פנסיה להמרה לקצבה מעל גיל 65", Financial),
    ("בסיס זיכוי לגמל להשקעה והשתלמות הפקדות שוטפות", Financial),
    ("בסיס זיכוי בגין ניודים וח\"פ קה\"ש , גמל וגמל להשקעה", Financial),
];

const MIGDAL_EXCLUDED_PRODUCTS: &[&str] = &[
    "בסיס מדידה לפנסיה",
    "בסיס זיכוי לפנסיה רובד ב` לגיל 60-65",
    "בריאות וריסק",
    "בסיס זיכוי לפנסיה רובד ב` לגיל 60",
    "בריאות ללא סיעוד כולל הגדלות - בסיס תפוקה לזיכוי",
    "בריאות כולל הגדלות - בסיס תפוקה לזיכוי סיעוד 40% שקלול",
    "בסיס מדידה מוצרים פיננסים",
    "בסיס מדידה עמלת קשת, העברות ח\"פ",
    "ביטוח מנהלים ללא הגדלות ,פרט ועצמאים",
    "בסיס מדידה לגמל להשקעה והשתלמות הפקדות שוטפות",
];

const MENORAH_PRODUCTS: &[(&str, Category)] = &[
    ("גמל להשקעה", Financial),
    ("ט.פ -חסכון", Financial),
    ("מ.פ-קה\"ש", Financial),
    ("מ.פ-קופת גמל", Financial),
    ("בריאות", Risk),
    ("מחלות קשות", Risk),
    ("משכנתא-מבנה", Risk),
    ("משכנתא-ריסק", Risk),
    ("סטט מנ-.נוסף", Risk),
    ("ריסק1", Risk),
    ("טופ לעתיד - מנהלים", Pension),
    ("טופ לעתיד - פרט", Pension),
    ("סטט מנ-.חסכון", Pension),
    ("פנסיה", Pension),
    ("ניוד פנסיה", PensionTransfer),
];

const CLAL_CABINET_PRODUCTS: &[(&str, Category)] = &[
    ("בריאות", Risk),
    ("ריסק מנהלים", Risk),
    ("ריסק טהור", Risk),
    ("ריסק משכנתא", Risk),
    ("פנסיה תיק משולב", Pension),
    ("חסכון פיננסי", Financial),
];

fn name(header: &str) -> ColumnSelector {
    ColumnSelector::name(header)
}

fn idx(index: usize) -> ColumnSelector {
    ColumnSelector::index(index)
}

fn table(entries: &[(&str, Category)]) -> BTreeMap<String, Category> {
    entries
        .iter()
        .map(|(product, category)| (product.to_string(), *category))
        .collect()
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn extra(key: &str, header: &str, kind: ExtraKind) -> ExtraColumn {
    ExtraColumn::new(key, name(header), kind)
}

fn by_name(id: &str, header_row: usize, data_start: usize, field_map: FieldMap) -> MappingDescriptor {
    MappingDescriptor::new(id, Addressing::ByName, ParseMode::Standard, header_row, data_start, field_map)
}

fn policy(id: &str, number: &str, agent_name: Option<&str>, amount: &str) -> MappingDescriptor {
    MappingDescriptor::new(
        id,
        Addressing::ByName,
        ParseMode::PolicyLevel,
        1,
        2,
        FieldMap {
            agent_number: Some(name(number)),
            agent_name: agent_name.map(name),
            current_amount: Some(name(amount)),
            ..Default::default()
        },
    )
}

/// Agent / branch subtotal layout shared by Hachshara, Phoenix and Shlomo.
fn agent_grouped(mut descriptor: MappingDescriptor) -> MappingDescriptor {
    descriptor.row_rules.subtotal_when = vec![CellPredicate::new(
        idx(1),
        TextTest::Contains(format!("{} עבור", TOTAL)),
    )];
    descriptor.row_rules.skip_when = vec![CellPredicate::new(idx(0), TextTest::Equals(TOTAL.into()))];
    descriptor.grouping = GroupRules {
        agent_marker: Some(" - ".to_string()),
        detail_excludes: strings(&[TOTAL]),
    };
    descriptor.derive_change = descriptor.field_map.change_pct.is_none();
    descriptor
}

fn life_standard(number: &str, agent_name: &str, amount: &str) -> FieldMap {
    FieldMap {
        agent_number: Some(name(number)),
        agent_name: Some(name(agent_name)),
        current_amount: Some(name(amount)),
        ..Default::default()
    }
}

fn filter_by_product(
    product_field: &str,
    categories: &[(&str, Category)],
    exclude_products: &[&str],
) -> AggregationRule {
    AggregationRule::FilterByProduct {
        product_field: product_field.to_string(),
        amount_field: "current_amount".to_string(),
        categories: table(categories),
        exclude_products: strings(exclude_products),
    }
}

fn simple(category: Category) -> AggregationProfile {
    AggregationProfile::new(AggregationRule::Simple {
        amount_field: "current_amount".to_string(),
        category,
    })
}

fn formulas(entries: Vec<(Category, Formula)>) -> BTreeMap<Category, Formula> {
    entries.into_iter().collect()
}

// ── Life carriers ──────────────────────────────────────────

fn ayalon() -> CarrierMapping {
    let mut main = by_name("main", 1, 2, life_standard("מספר סוכן", "שם סוכן", "פרמיה לגביה"));
    main.description = "Policy rows with collection premium per product".to_string();
    main.name_cleanup = NameCleanup::Clean;
    main.extra_columns = vec![
        extra("product", "תיאור מוצר", ExtraKind::Text),
        extra("policy_number", "מספר פוליסה", ExtraKind::Text),
        extra("policy_status", "סטאטוס פוליסה", ExtraKind::Text),
    ];

    CarrierMapping::new(
        1,
        "Ayalon",
        "איילון",
        AggregationProfile::new(filter_by_product("product", AYALON_PRODUCTS, &[])),
    )
    .with_descriptor(main)
}

fn altshuler() -> CarrierMapping {
    let mut pension = by_name(
        "pension_tab",
        1,
        2,
        life_standard("רישיון סוכן", "סוכן", "פרמיה שנתית - ברוטו"),
    );
    pension.description = "Tab 1: pension contracts with gross annual premium".to_string();
    pension.signature_columns = strings(&["שנה", "סוכן", "תאריך הקמה", "ד.נ. משוקלל מצבירה %"]);
    pension.month_filter_column = Some(name("חודש"));
    pension.extra_columns = vec![
        extra("product", "[מוצר]", ExtraKind::Text),
        extra("gross_annual_premium", "פרמיה שנתית - ברוטו", ExtraKind::Number),
        extra(
            "internal_transfer_by_join_date",
            "תנועות העברה פנימה לפי תאריך הצטרפות",
            ExtraKind::Number,
        ),
        extra("cancellations_year_b", "ביטולים שנה ב", ExtraKind::Number),
        extra("establishment_date", "תאריך הקמה", ExtraKind::Date),
    ];

    let mut gemel = by_name(
        "gemel_tab",
        1,
        2,
        life_standard("רישיון סוכן", "שם סוכן", "הפקדה חד פעמית"),
    );
    gemel.description = "Tab 2: one-time deposits and sales management fees".to_string();
    gemel.signature_columns = strings(&[
        "הפקדה חד פעמית",
        "דמי ניהול מכירות משוקלל. תנועות בלבד",
        "ביטול שנה א",
    ]);
    gemel.month_filter_column = Some(name("חודש"));
    gemel.extra_columns = vec![
        extra("product", "מוצר", ExtraKind::Text),
        extra("one_time_premium", "הפקדה חד פעמית", ExtraKind::Number),
        extra(
            "internal_transfer_by_join_date",
            "תנועות העברה פנימה לפי תאריך הצטרפות",
            ExtraKind::Number,
        ),
        extra("cancellations_year_a", "ביטול שנה א", ExtraKind::Number),
        extra("join_date", "תאריך הצטרפות לקופה", ExtraKind::Date),
    ];

    let profile = AggregationProfile::new(AggregationRule::MultiSheetFormulas {
        sheets: vec![
            SheetFormulas {
                name: "gemel".to_string(),
                marker_field: "one_time_premium".to_string(),
                formulas: formulas(vec![(
                    Financial,
                    Formula::sum([
                        "one_time_premium",
                        "internal_transfer_by_join_date",
                        "cancellations_year_a",
                    ]),
                )]),
            },
            SheetFormulas {
                name: "pension".to_string(),
                marker_field: "gross_annual_premium".to_string(),
                formulas: formulas(vec![(
                    Pension,
                    Formula::sum([
                        "gross_annual_premium",
                        "internal_transfer_by_join_date",
                        "cancellations_year_b",
                    ]),
                )]),
            },
        ],
    });

    CarrierMapping::new(2, "Altshuler Shaham", "אלטשולר שחם", profile)
        .with_aliases(["Altshuler"])
        .with_descriptor(pension)
        .with_descriptor(gemel)
        .with_default("pension_tab")
}

fn analyst() -> CarrierMapping {
    let mut main = by_name("main", 1, 2, life_standard("שם סוכן", "שם סוכן", "יתרה"));
    main.name_cleanup = NameCleanup::Clean;
    main.number_cleanup = NameCleanup::Clean;
    main.extra_columns = vec![extra("product", "סניף, מסלול, חשבון", ExtraKind::Text)];

    CarrierMapping::new(3, "Analyst", "אנליסט", simple(Financial)).with_descriptor(main)
}

fn hachshara() -> CarrierMapping {
    let set = |id: &str, amount: &str, category: Category| {
        let mut d = by_name(
            id,
            1,
            2,
            FieldMap {
                agent_string: Some(name("סוכן")),
                current_amount: Some(name(amount)),
                ..Default::default()
            },
        );
        d.signature_columns = strings(&[amount]);
        d.fixed_category = Some(category);
        d
    };

    let profile = AggregationProfile::new(AggregationRule::ColumnBased {
        formulas: formulas(vec![
            (Financial, Formula::sum(["one_time_premium"])),
            (Risk, Formula::sum(["life_monthly"])),
        ]),
        status_filter: None,
    });

    CarrierMapping::new(4, "Hachshara", "הכשרה", profile)
        .with_descriptor(set("risk", "Sum of פרמיה חודשית", Risk))
        .with_descriptor(set("pension", "Sum of הפקדות", Pension))
        .with_default("risk")
}

fn phoenix() -> CarrierMapping {
    let mut main = by_name("main", 1, 2, life_standard("מס סוכן", "שם סוכן", "תפוקה"));
    main.name_cleanup = NameCleanup::Clean;
    main.extra_columns = vec![
        extra("product", "מוצר", ExtraKind::Text),
        extra("product_group", "קבוצת מוצר", ExtraKind::Text),
        extra("policy_status", "מצב פוליסה", ExtraKind::Text),
        extra("life_monthly", "חודשי חיים", ExtraKind::Number),
        extra("production_date", "ת. פרודוקציה", ExtraKind::Date),
    ];

    let mut profile = AggregationProfile::new(filter_by_product("product", PHOENIX_PRODUCTS, &[]));
    profile.exclude_agents = strings(&["אורלי יונאי", "רייזר ענת", "עידן דיגיטלי"]);

    CarrierMapping::new(5, "The Phoenix", "הפניקס", profile)
        .with_aliases(["Phoenix"])
        .with_descriptor(main)
}

fn harel() -> CarrierMapping {
    let mut main = by_name(
        "main",
        1,
        2,
        FieldMap {
            agent_string: Some(name("__EMPTY")),
            current_amount: Some(name("סיכוני פרט")),
            ..Default::default()
        },
    );
    main.description = "One row per agent, 'name - number' in the unlabeled first column".to_string();
    main.agent_parse = AgentParseRule::SplitLast {
        delimiter: "-".to_string(),
    };
    main.row_rules.skip_keywords = strings(&[TOTAL]);
    main.extra_columns = vec![
        extra("private_risk", "סיכוני פרט", ExtraKind::Number),
        extra("pension_harel", "פנסיוני", ExtraKind::Number),
        extra(
            "savings_products_no_financials",
            "מוצרי צבירה ללא פיננסים",
            ExtraKind::Number,
        ),
        extra("pension_transfer_net", "ניוד פנסיה - נטו", ExtraKind::Number),
        extra("nursing_care_harel", "נסיעות חול", ExtraKind::Number),
    ];

    let profile = AggregationProfile::new(AggregationRule::ColumnBased {
        formulas: formulas(vec![
            (Pension, Formula::sum(["pension_harel"])),
            (Risk, Formula::sum(["private_risk"])),
            (Financial, Formula::sum(["savings_products_no_financials"])),
            (PensionTransfer, Formula::sum(["pension_transfer_net"])),
        ]),
        status_filter: None,
    });

    CarrierMapping::new(6, "Harel", "הראל", profile).with_descriptor(main)
}

fn clal() -> CarrierMapping {
    let mut financial = by_name(
        "financial",
        4,
        5,
        FieldMap {
            agent_number: Some(name("מספר סוכן")),
            current_amount: Some(name("סה\"כ פיננסים")),
            ..Default::default()
        },
    );
    financial.description = "Set 1: year-to-date financial products".to_string();
    financial.sheet_name = Some("רמת פוליסה כל המוצרים".to_string());
    financial.signature_columns = strings(&["סה\"כ פיננסים", "מספר סוכן"]);
    financial.fixed_category = Some(Financial);
    financial.cumulative = true;
    financial.row_rules.stop_when = vec![CellPredicate::new(idx(1), TextTest::Contains("Count:".into()))];

    let mut transfer = by_name(
        "transfer",
        1,
        2,
        FieldMap {
            agent_number: Some(name("מספר סוכן מוביל")),
            current_amount: Some(name("ניוד_נטו")),
            ..Default::default()
        },
    );
    transfer.description = "Set 2: year-to-date net pension transfers".to_string();
    transfer.sheet_name = Some("גיליון1".to_string());
    transfer.signature_columns = strings(&["ניוד_נטו", "מספר סוכן מוביל"]);
    transfer.fixed_category = Some(PensionTransfer);
    transfer.cumulative = true;

    let mut policy_level = MappingDescriptor::new(
        "policy",
        Addressing::ByName,
        ParseMode::PolicyLevel,
        4,
        5,
        FieldMap {
            agent_number: Some(name("מספר סוכן")),
            current_amount: Some(name("פרמיה כוללת ממודדת")),
            ..Default::default()
        },
    );
    policy_level.description = "Set 3: monthly policy rows classified by cabinet product".to_string();
    policy_level.sheet_name = Some("רמת פוליסה".to_string());
    policy_level.signature_columns =
        strings(&["מספר סוכן", "חודש רישום תפוקה", "מוצר קבינט", "פרמיה כוללת ממודדת"]);
    policy_level.month_filter_column = Some(name("חודש רישום תפוקה"));
    policy_level.category_column = Some(name("מוצר קבינט"));
    policy_level.classification = table(CLAL_CABINET_PRODUCTS);
    policy_level.extra_columns = vec![extra("product", "מוצר קבינט", ExtraKind::Text)];

    let mut profile = AggregationProfile::new(AggregationRule::ColumnBased {
        formulas: formulas(vec![
            (Risk, Formula::sum(["health_business", "risk_business"])),
            (Pension, Formula::sum(["executive_profile", "new_pension_fund"])),
            (Financial, Formula::sum(["total_financial"])),
            (PensionTransfer, Formula::sum(["net_transfer"])),
        ]),
        status_filter: None,
    });
    profile.cumulative = true;

    CarrierMapping::new(7, "Clal", "כלל", profile)
        .with_descriptor(financial)
        .with_descriptor(transfer)
        .with_descriptor(policy_level)
        .with_default("financial")
}

fn migdal() -> CarrierMapping {
    let mut main = by_name("main", 1, 2, life_standard("סוכן", "שם סוכן", "סה\"כ פרמיה נמדדת"));
    main.name_cleanup = NameCleanup::Clean;
    main.extra_columns = vec![
        extra("measurement_basis_name", "שם בסיס מדידה", ExtraKind::Text),
        extra("registration_date", "תאריך רישום", ExtraKind::Date),
    ];

    let mut profile = AggregationProfile::new(filter_by_product(
        "measurement_basis_name",
        MIGDAL_PRODUCTS,
        MIGDAL_EXCLUDED_PRODUCTS,
    ));
    profile.exclude_agents = strings(&["אורלי יונאי"]);

    CarrierMapping::new(8, "Migdal", "מגדל", profile).with_descriptor(main)
}

fn mediho() -> CarrierMapping {
    let mut main = by_name("main", 1, 2, life_standard("הערות", "שם סוכן", "פרמיה לקוח"));
    main.name_cleanup = NameCleanup::Clean;
    main.extra_columns = vec![
        extra("classification", "סיווג", ExtraKind::Text),
        extra("report_date", "תאריך דוח", ExtraKind::Date),
    ];

    CarrierMapping::new(9, "Mediho", "מדיהו", simple(Risk)).with_descriptor(main)
}

fn mor() -> CarrierMapping {
    let mut main = by_name(
        "main",
        1,
        2,
        life_standard("מספר סוכן מתוגמל", "שם סוכן מתוגמל", "סכום תנועה"),
    );
    main.name_cleanup = NameCleanup::Clean;
    main.extra_columns = vec![
        extra("product", "סוג מוצר", ExtraKind::Text),
        extra("transaction_type", "סוג תנועה", ExtraKind::Text),
        extra("value_date", "תאריך ערך", ExtraKind::Date),
    ];

    CarrierMapping::new(10, "Mor", "מור", simple(Financial)).with_descriptor(main)
}

fn menorah() -> CarrierMapping {
    let mut main = by_name("main", 1, 2, life_standard("מספר סוכן", "שם סוכן", "תפוקה נטו"));
    main.description = "Policy-level production by branch name".to_string();
    main.signature_columns = strings(&["מספר סוכן", "שם ענף", "תפוקה נטו"]);
    main.name_cleanup = NameCleanup::Clean;
    main.extra_columns = vec![
        extra("product", "שם ענף", ExtraKind::Text),
        extra("product_group", "ענף ראשי", ExtraKind::Text),
        extra("date", "תאריך", ExtraKind::Date),
    ];

    let mut transfer = by_name(
        "pension_transfer",
        1,
        2,
        FieldMap {
            agent_string: Some(name("סוכן")),
            current_amount: Some(name("סכום העברה - ניוד נטו")),
            ..Default::default()
        },
    );
    transfer.description = "Net pension transfers, 'number  name' agent cells".to_string();
    transfer.signature_columns = strings(&["סוכן", "סכום העברה - ניוד נטו"]);
    transfer.agent_parse = AgentParseRule::SplitFirst {
        delimiter: " ".to_string(),
    };
    transfer.fixed_category = Some(PensionTransfer);
    transfer.extra_columns = vec![extra("decisive_date", "מועד קובע", ExtraKind::Date)];

    let mut profile = AggregationProfile::new(filter_by_product("product", MENORAH_PRODUCTS, &[]));
    profile.exclude_agents = strings(&["דולב רן", "אורטל יונאי"]);
    profile.umbrella = Some(UmbrellaAdjustment {
        umbrella_name_contains: "גל אלמגור".to_string(),
        subtract_agents: strings(&["מזרחי שלי", "בלאן סמיר"]),
    });

    CarrierMapping::new(11, "Menorah", "מנורה", profile)
        .with_descriptor(main)
        .with_descriptor(transfer)
        .with_default("main")
}

// ── Elementary carriers ────────────────────────────────────

fn elementary(id: i64, name: &str, name_local: &str) -> CarrierMapping {
    CarrierMapping::new(id, name, name_local, AggregationProfile::new(AggregationRule::Premium))
}

fn ayalon_elementary() -> CarrierMapping {
    let mut d = MappingDescriptor::new(
        "sales_renewals",
        Addressing::ByIndex,
        ParseMode::Standard,
        2,
        4,
        FieldMap {
            agent_string: Some(idx(0)),
            previous_amount: Some(idx(1)),
            current_amount: Some(idx(2)),
            change_pct: Some(idx(3)),
            ..Default::default()
        },
    );
    d.sheet_name = Some("אלמנטר - מכירות וחידושים סוכ".to_string());
    d.signature_columns = strings(&["סוכן א'", "אחוז גידול"]);
    d.row_rules.stop_keywords = strings(&REPORT_FOOTER_KEYWORDS);
    d.row_rules.skip_keywords = strings(&[TOTAL]);

    elementary(101, "Ayalon Elementary", "איילון אלמנטרי").with_descriptor(d)
}

fn hachshara_elementary() -> CarrierMapping {
    let mut d = MappingDescriptor::new(
        "branches",
        Addressing::ByIndex,
        ParseMode::AgentGrouped,
        2,
        4,
        FieldMap {
            agent_string: Some(idx(0)),
            branch: Some(idx(1)),
            previous_amount: Some(idx(2)),
            current_amount: Some(idx(4)),
            ..Default::default()
        },
    );
    d.sheet_name = Some("Sheet1".to_string());
    d.signature_columns = strings(&["סוכן", "הקבצת ענף מסחרי", "פרמיה ברוטו"]);

    elementary(104, "Hachshara Elementary", "הכשרה אלמנטרי").with_descriptor(agent_grouped(d))
}

fn phoenix_elementary() -> CarrierMapping {
    let mut d = MappingDescriptor::new(
        "branches",
        Addressing::ByIndex,
        ParseMode::AgentGrouped,
        2,
        3,
        FieldMap {
            agent_string: Some(idx(0)),
            branch: Some(idx(1)),
            current_amount: Some(idx(2)),
            previous_amount: Some(idx(3)),
            change_pct: Some(idx(4)),
            ..Default::default()
        },
    );
    d.sheet_name = Some("Sheet1".to_string());
    d.signature_columns = strings(&["סוכן (עדכני)", "ענף", "שיעור שינוי חודש נוכחי"]);
    d.row_rules.stop_keywords = strings(&["שם הדוח"]);
    d.row_rules
        .stop_keywords
        .extend(strings(&REPORT_FOOTER_KEYWORDS));

    elementary(105, "The Phoenix Elementary", "הפניקס אלמנטרי")
        .with_aliases(["The Phoenix (Including excellence)"])
        .with_descriptor(agent_grouped(d))
}

fn harel_elementary() -> CarrierMapping {
    let mut d = MappingDescriptor::new(
        "agents",
        Addressing::ByIndex,
        ParseMode::Standard,
        1,
        2,
        FieldMap {
            agent_string: Some(idx(1)),
            current_amount: Some(idx(2)),
            previous_amount: Some(idx(3)),
            change_pct: Some(idx(5)),
            ..Default::default()
        },
    );
    d.sheet_name = Some("Sheet 1".to_string());
    d.signature_columns = strings(&["פרמיה שנה נוכחית", "פרמיה אשתקד", "הפרש פרמיה מול אשתקד"]);
    d.row_rules.skip_when = vec![CellPredicate::new(idx(1), TextTest::Contains(TOTAL.into()))];

    elementary(106, "Harel Elementary", "הראל אלמנטרי").with_descriptor(d)
}

fn clal_elementary() -> CarrierMapping {
    let mut d = policy("policies", "מס' סוכן", Some("שם סוכן"), "פרמיה ברוטו");
    d.sheet_name = Some("excel.csv (1)".to_string());
    d.signature_columns = strings(&["מס' סוכן", "שם סוכן", "פרמיה ברוטו"]);
    d.name_cleanup = NameCleanup::StripTrailingNumber;
    d.row_rules.skip_when = vec![CellPredicate::new(
        name("סניף"),
        TextTest::Contains("סה''כ".into()),
    )];

    elementary(107, "Clal Elementary", "כלל אלמנטרי").with_descriptor(d)
}

fn migdal_elementary() -> CarrierMapping {
    let mut d = policy("policies", "מספר סוכן", Some("שם סוכן"), "פרמיה ברוטו");
    d.sheet_name = Some("דוח תפוקה חדש".to_string());
    d.signature_columns = strings(&["מספר סוכן", "שם סוכן", "פרמיה ברוטו"]);

    elementary(108, "Migdal Elementary", "מגדל אלמנטרי").with_descriptor(d)
}

fn menorah_elementary() -> CarrierMapping {
    let mut d = MappingDescriptor::new(
        "sub_agents",
        Addressing::ByIndex,
        ParseMode::Standard,
        1,
        3,
        FieldMap {
            agent_string: Some(idx(0)),
            current_amount: Some(idx(1)),
            previous_amount: Some(idx(2)),
            change_pct: Some(idx(3)),
            ..Default::default()
        },
    );
    d.sheet_name = Some("Sheet1".to_string());
    d.signature_columns = strings(&["שם סוכן משנה"]);
    d.agent_parse = AgentParseRule::SplitFirst {
        delimiter: " ".to_string(),
    };
    d.row_rules.skip_keywords = strings(&[TOTAL]);

    elementary(111, "Menorah Elementary", "מנורה אלמנטרי").with_descriptor(d)
}

fn shomera() -> CarrierMapping {
    let mut d = MappingDescriptor::new(
        "three_row_groups",
        Addressing::ByIndex,
        ParseMode::ThreeRowGroup,
        1,
        13,
        FieldMap {
            agent_string: Some(idx(0)),
            label: Some(idx(1)),
            current_amount: Some(idx(2)),
            ..Default::default()
        },
    );
    d.description = "Agent row with last year's total, current-year row, change row".to_string();
    d.signature_columns = strings(&["פריטים", "זמן", TOTAL]);
    d.three_row = ThreeRowRules {
        agent_markers: strings(&[" - ", " – ", " — ", " ־ "]),
        agent_excludes: strings(&["פריטים", "סוכן", "משנה"]),
        reject_month_names: true,
        change_row_label: Some("שיעור השינוי".to_string()),
    };
    d.derive_change = true;

    elementary(112, "Shomera", "שומרה").with_descriptor(d)
}

fn shlomo() -> CarrierMapping {
    let mut d = MappingDescriptor::new(
        "monthly_branches",
        Addressing::Mixed,
        ParseMode::AgentGrouped,
        1,
        2,
        FieldMap {
            agent_string: Some(idx(0)),
            branch: Some(idx(1)),
            current_amount: Some(ColumnSelector::PeriodMonth { year_offset: 0 }),
            previous_amount: Some(ColumnSelector::PeriodMonth { year_offset: -1 }),
            ..Default::default()
        },
    );
    d.description = "Month-named premium columns, e.g. 'יולי 2025' against 'יולי 2024'".to_string();
    d.sheet_name = Some("Sheet1".to_string());

    elementary(113, "Shlomo", "שלמה").with_descriptor(agent_grouped(d))
}

fn shirbit() -> CarrierMapping {
    let mut d = policy("policies", "מספר סוכן", Some("סוכן"), "פרמיה ברוטו");
    d.sheet_name = Some("דוח פרודוקציית סוכנים מפורט".to_string());
    d.signature_columns = strings(&["סוכן", "מספר סוכן", "פרמיה ברוטו"]);

    elementary(114, "Shirbit", "שירביט").with_descriptor(d)
}

fn haklai() -> CarrierMapping {
    let mut d = MappingDescriptor::new(
        "branches",
        Addressing::ByIndex,
        ParseMode::Standard,
        2,
        4,
        FieldMap {
            agent_string: Some(idx(1)),
            previous_amount: Some(idx(3)),
            current_amount: Some(idx(5)),
            change_pct: Some(idx(7)),
            ..Default::default()
        },
    );
    d.signature_columns = strings(&["סניפים", "סוכנים", "ענף מסחרי"]);
    d.row_rules.skip_keywords = strings(&[TOTAL]);
    d.row_rules.skip_when = vec![
        CellPredicate::new(idx(0), TextTest::Equals("סניפים".into())),
        CellPredicate::new(idx(0), TextTest::Equals(TOTAL.into())),
    ];
    d.extra_columns = vec![
        ExtraColumn::new("branch", idx(0), ExtraKind::Text),
        ExtraColumn::new("commercial_branch", idx(2), ExtraKind::Text),
    ];

    elementary(115, "Haklai", "חקלאי").with_descriptor(d)
}

fn mms() -> CarrierMapping {
    let mut d = policy("policies", "מס' קבוצה", Some("שם קבוצה"), "תשלום ע\"י המנוי");
    d.signature_columns = strings(&["מס' קבוצה", "שם קבוצה", "מחיר הסכם"]);

    elementary(116, "MMS", "מ.מ.ס")
        .with_aliases(["M.M.S"])
        .with_descriptor(d)
}

fn passport() -> CarrierMapping {
    let mut d = policy("premium", "מספר סוכן", Some("שם סוכן מוכר"), "סה״כ פרמיה ששולמה(₪)");
    d.sheet_name = Some("Premium".to_string());
    d.signature_columns = strings(&["שם סוכן מוכר", "מספר סוכן", "סה״כ פרמיה ששולמה(₪)"]);
    d.row_rules.skip_when = vec![CellPredicate::new(name("מספר סוכן"), TextTest::Equals("-".into()))];

    elementary(119, "Passport", "פספורט")
        .with_aliases(["Passport Card", "פספורט קארד"])
        .with_descriptor(d)
}

fn cooper_nineveh() -> CarrierMapping {
    let mut d = MappingDescriptor::new(
        "agents",
        Addressing::ByName,
        ParseMode::Standard,
        1,
        2,
        FieldMap {
            agent_number: Some(name("מספר סוכן")),
            agent_name: Some(name("שם סוכן")),
            current_amount: Some(name("פרמיה_ברוטו")),
            ..Default::default()
        },
    );
    d.signature_columns = strings(&["שם סוכן", "מספר סוכן", "פרמיה_ברוטו"]);
    d.row_rules.skip_keywords = strings(&[TOTAL]);

    elementary(121, "Cooper Nineveh", "קופר נינווה").with_descriptor(d)
}

fn securities() -> CarrierMapping {
    let mut d = MappingDescriptor::new(
        "single_agent",
        Addressing::ByIndex,
        ParseMode::Standard,
        1,
        2,
        FieldMap {
            current_amount: Some(idx(11)),
            ..Default::default()
        },
    );
    d.description = "Whole file belongs to one agent".to_string();
    d.signature_columns = strings(&["פרמיה ברוטו"]);
    d.fixed_agent = Some(FixedAgent {
        number: "438".to_string(),
        name: Some("גל אלמגור-סוכנים".to_string()),
    });
    d.row_rules.skip_zero_amount = true;

    elementary(123, "Securities", "סקוריטס").with_descriptor(d)
}

fn kash() -> CarrierMapping {
    let mut d = policy("policies", "מס סוכן", None, "פרמיה ברוטו");
    d.signature_columns = strings(&["מס סוכן", "פרמיה ברוטו", "עמלה"]);
    d.row_rules.skip_keywords = strings(&[TOTAL]);
    d.extra_columns = vec![
        extra("production_month", "חודש תפוקה", ExtraKind::Text),
        extra("commission", "עמלה", ExtraKind::Number),
    ];

    elementary(125, "Kash", "קאש").with_descriptor(d)
}

pub(super) fn carriers() -> Vec<CarrierMapping> {
    vec![
        ayalon(),
        altshuler(),
        analyst(),
        hachshara(),
        phoenix(),
        harel(),
        clal(),
        migdal(),
        mediho(),
        mor(),
        menorah(),
        ayalon_elementary(),
        hachshara_elementary(),
        phoenix_elementary(),
        harel_elementary(),
        clal_elementary(),
        migdal_elementary(),
        menorah_elementary(),
        shomera(),
        shlomo(),
        shirbit(),
        haklai(),
        mms(),
        passport(),
        cooper_nineveh(),
        securities(),
        kash(),
    ]
}
