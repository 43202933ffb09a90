// tidemark-core/src/infrastructure/templating/builtin.rs
//
// Default accessor templates. A project overrides one by dropping a file
// with the same name into `templates/databases/`.

pub const COLUMNS: &str = r#"# {{ table }}

## Columns

{% for column in columns %}
- {{ column.name }} ({{ column.data_type }}){{ " NOT NULL" if not column.is_nullable }}
{% endfor %}
"#;

pub const PREVIEW: &str = r#"# {{ table }}

## Preview

First {{ rows | length }} rows of `{{ schema }}.{{ table }}`.

```jsonl
{% for row in rows %}
{{ row }}
{% endfor %}
```
"#;

pub const DESCRIPTION: &str = r#"# {{ table }}

Dataset: {{ schema }}
Row Count: {{ row_count | thousands }}
Column Count: {{ column_count }}
{% if description %}

## Description

{{ description }}
{% endif %}
"#;

pub const PROFILING: &str = r#"# {{ table }}

## Profiling

Row Count: {{ row_count | thousands }}

| Column | Type | Nulls | Distinct | Min | Max |
|--------|------|-------|----------|-----|-----|
{% for p in profiles %}
{% if p.error %}
| {{ p.name }} | {{ p.data_type }} | Error: {{ p.error }} | | | |
{% else %}
| {{ p.name }} | {{ p.data_type }} | {{ p.null_count | thousands }} | {{ p.distinct_count | thousands }} | {{ p.min | truncate_scalar }} | {{ p.max | truncate_scalar }} |
{% endif %}
{% endfor %}
"#;

/// `(template name, source)` for every accessor.
pub const ALL: [(&str, &str); 4] = [
    ("columns.md.j2", COLUMNS),
    ("preview.md.j2", PREVIEW),
    ("description.md.j2", DESCRIPTION),
    ("profiling.md.j2", PROFILING),
];
