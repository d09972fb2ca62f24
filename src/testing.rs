//! Test fixtures: a small school/HR model and translation shortcuts.

use crate::error::Result;
use crate::expr::Expr;
use crate::model::ModelRegistry;
use crate::render::{render, SqlServerDialect};
use crate::sql::SqlStatement;
use crate::translate::Translator;

pub(crate) const MODEL_TOML: &str = r#"
[[entity]]
name = "Student"
[[entity.column]]
member = "StudentId"
primary_key = true
[[entity.column]]
member = "Name"
column = "FullName"
[[entity.column]]
member = "Age"
[[entity.column]]
member = "CourseId"
[[entity.column]]
member = "IsActive"
[[entity.column]]
member = "EnrolledOn"
[[entity.navigation]]
name = "NavCourse"
target = "Course"
cardinality = "to_one_required"
keys = [{ parent = "CourseId", child = "CourseId" }]

[[entity]]
name = "Course"
[[entity.column]]
member = "CourseId"
primary_key = true
[[entity.column]]
member = "Title"

[[entity]]
name = "Enrollment"
[[entity.column]]
member = "StudentId"
primary_key = true
[[entity.column]]
member = "CourseId"
primary_key = true
[[entity.column]]
member = "Grade"
[[entity.navigation]]
name = "NavStudent"
target = "Student"
cardinality = "to_one_required"
keys = [{ parent = "StudentId", child = "StudentId" }]

[[entity]]
name = "Employee"
table = "Employees"
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
[[entity.navigation]]
name = "NavManager"
target = "Employee"
cardinality = "to_one_optional"
keys = [{ parent = "ManagerId", child = "EmployeeId" }]

[[entity]]
name = "EmployeeDegree"
[[entity.column]]
member = "RowId"
primary_key = true
[[entity.column]]
member = "EmployeeId"
[[entity.column]]
member = "Degree"
[[entity.column]]
member = "University"
[[entity.navigation]]
name = "NavEmployee"
target = "Employee"
cardinality = "to_one_required"
keys = [{ parent = "EmployeeId", child = "EmployeeId" }]

[[entity]]
name = "Department"
[[entity.column]]
member = "DepartmentId"
primary_key = true
[[entity.column]]
member = "Name"
[[entity.column]]
member = "LocationId"
[[entity.navigation]]
name = "NavLocation"
target = "Location"
cardinality = "to_one_required"
keys = [{ parent = "LocationId", child = "LocationId" }]

[[entity]]
name = "Location"
[[entity.column]]
member = "LocationId"
primary_key = true
[[entity.column]]
member = "City"
[[entity.column]]
member = "CountryId"
[[entity.navigation]]
name = "NavCountry"
target = "Country"
cardinality = "to_one_required"
keys = [{ parent = "CountryId", child = "CountryId" }]

[[entity]]
name = "Country"
[[entity.column]]
member = "CountryId"
primary_key = true
[[entity.column]]
member = "Name"

[[entity]]
name = "Asset"
[[entity.column]]
member = "RowId"
primary_key = true
[[entity.column]]
member = "ParentId"
[[entity.column]]
member = "Name"
"#;

pub(crate) fn model() -> ModelRegistry {
    ModelRegistry::from_toml(MODEL_TOML).expect("fixture model is valid")
}

/// Translates `expr` against the fixture model with default options.
pub(crate) fn translate(expr: &Expr) -> Result<SqlStatement> {
    let model = model();
    Translator::new(&model).translate(expr)
}

/// Translates and renders `expr` as SQL Server text, panicking on failure.
pub(crate) fn sqlserver(expr: &Expr) -> String {
    let statement = translate(expr).unwrap_or_else(|e| panic!("translation failed: {e}"));
    render(&statement, &SqlServerDialect)
        .unwrap_or_else(|e| panic!("rendering failed: {e}"))
        .sql
}
