//! Benchmarks for the translation pipeline: preprocessing, conversion to the
//! SQL model, and rendering per dialect.
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use linqsql::expr::build::*;
use linqsql::expr::{Expr, TypeRef};
use linqsql::model::ModelRegistry;
use linqsql::render::{render, PostgresDialect, SqlServerDialect};
use linqsql::Translator;

const MODEL: &str = r#"
[[entity]]
name = "Employee"
[[entity.column]]
member = "EmployeeId"
primary_key = true
[[entity.column]]
member = "Name"
[[entity.column]]
member = "DepartmentId"
[[entity.column]]
member = "ManagerId"
[[entity.navigation]]
name = "NavDepartment"
target = "Department"
cardinality = "to_one_optional"
keys = [{ parent = "DepartmentId", child = "DepartmentId" }]
[[entity.navigation]]
name = "NavDegrees"
target = "EmployeeDegree"
cardinality = "to_many"
keys = [{ parent = "EmployeeId", child = "EmployeeId" }]

[[entity]]
name = "EmployeeDegree"
[[entity.column]]
member = "RowId"
primary_key = true
[[entity.column]]
member = "EmployeeId"
[[entity.column]]
member = "Degree"

[[entity]]
name = "Department"
[[entity.column]]
member = "DepartmentId"
primary_key = true
[[entity.column]]
member = "Name"
"#;

fn filtered_projection() -> Expr {
    Query::from("Employee")
        .where_("x", |x| gt(member(x, "EmployeeId"), constant(100)))
        .order_by("x", |x| member(x, "Name"))
        .select("x", TypeRef::String, |x| member(x, "Name"))
        .take(50)
        .into_expr()
}

fn navigation_join() -> Expr {
    Query::from("Employee")
        .select("x", TypeRef::Anonymous, |x| {
            new_anon(vec![
                ("Name", member(x.clone(), "Name")),
                ("Department", member(nav(x, "NavDepartment", TypeRef::entity("Department")), "Name")),
            ])
        })
        .into_expr()
}

fn collection_navigation() -> Expr {
    Query::from("Employee")
        .select_many_with(
            ("x", "d"),
            TypeRef::entity("EmployeeDegree"),
            |x| nav(x, "NavDegrees", TypeRef::enumerable(TypeRef::entity("EmployeeDegree"))),
            TypeRef::Anonymous,
            |x, d| new_anon(vec![("Name", member(x, "Name")), ("Degree", member(d, "Degree"))]),
        )
        .into_expr()
}

fn recursive_hierarchy() -> Expr {
    Query::from("Employee")
        .where_("x", |x| eq(member(x, "ManagerId"), null()))
        .recursive_union("e", |e| {
            e.join(
                Query::from("Employee"),
                |o| member(o, "EmployeeId"),
                |i| member(i, "ManagerId"),
                TypeRef::entity("Employee"),
                |_, i| i,
            )
        })
        .into_expr()
}

fn cases() -> Vec<(&'static str, Expr)> {
    vec![
        ("filtered_projection", filtered_projection()),
        ("navigation_join", navigation_join()),
        ("collection_navigation", collection_navigation()),
        ("recursive_hierarchy", recursive_hierarchy()),
    ]
}

fn load_model() -> ModelRegistry {
    ModelRegistry::from_toml(MODEL).unwrap()
}

fn bench_preprocess(c: &mut Criterion) {
    let model = load_model();
    let translator = Translator::new(&model);
    let mut group = c.benchmark_group("preprocess");

    for (name, expr) in cases() {
        group.bench_with_input(BenchmarkId::from_parameter(name), &expr, |b, expr| {
            b.iter(|| translator.preprocess(black_box(expr.clone())).unwrap());
        });
    }

    group.finish();
}

fn bench_translate(c: &mut Criterion) {
    let model = load_model();
    let translator = Translator::new(&model);
    let mut group = c.benchmark_group("translate");

    for (name, expr) in cases() {
        group.bench_with_input(BenchmarkId::from_parameter(name), &expr, |b, expr| {
            b.iter(|| translator.translate(black_box(expr)).unwrap());
        });
    }

    group.finish();
}

fn bench_render(c: &mut Criterion) {
    let model = load_model();
    let translator = Translator::new(&model);
    let mut group = c.benchmark_group("render");

    for (name, expr) in cases() {
        let statement = translator.translate(&expr).unwrap();
        group.bench_with_input(BenchmarkId::new("sqlserver", name), &statement, |b, s| {
            b.iter(|| render(black_box(s), &SqlServerDialect).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("postgres", name), &statement, |b, s| {
            b.iter(|| render(black_box(s), &PostgresDialect).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_preprocess, bench_translate, bench_render);
criterion_main!(benches);
