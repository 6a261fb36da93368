//! SQLite schema. Applied idempotently at pool creation.

/// DDL statements, executed in order.
pub const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS repositories (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        source TEXT NOT NULL,
        origin_url TEXT,
        branch TEXT,
        archive_path TEXT,
        status TEXT NOT NULL DEFAULT 'pending',
        file_count INTEGER NOT NULL DEFAULT 0,
        symbol_count INTEGER NOT NULL DEFAULT 0,
        stars INTEGER,
        primary_language TEXT,
        last_commit TEXT,
        error_message TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    // Duplicate-import rejection for remote repositories.
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_repos_origin_branch
        ON repositories (origin_url, branch)
        WHERE origin_url IS NOT NULL
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS files (
        id TEXT PRIMARY KEY,
        repo_id TEXT NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
        path TEXT NOT NULL,
        language TEXT NOT NULL,
        byte_size INTEGER NOT NULL,
        line_count INTEGER NOT NULL,
        sha256 TEXT NOT NULL,
        parse_error TEXT,
        content TEXT NOT NULL DEFAULT '',
        UNIQUE (repo_id, path)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS symbols (
        id TEXT PRIMARY KEY,
        file_id TEXT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        kind TEXT NOT NULL,
        line_start INTEGER NOT NULL,
        line_end INTEGER NOT NULL,
        signature TEXT NOT NULL DEFAULT '',
        docstring TEXT,
        has_docstring INTEGER NOT NULL DEFAULT 0,
        docstring_length INTEGER NOT NULL DEFAULT 0,
        cyclomatic_complexity INTEGER NOT NULL DEFAULT 1,
        maintainability_index REAL NOT NULL DEFAULT 100.0,
        mi_approximated INTEGER NOT NULL DEFAULT 1,
        loc INTEGER NOT NULL DEFAULT 0,
        comment_lines INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_symbols_file ON symbols (file_id)",
    "CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols (name)",
    r#"
    CREATE TABLE IF NOT EXISTS call_edges (
        from_symbol_id TEXT NOT NULL REFERENCES symbols(id) ON DELETE CASCADE,
        to_name TEXT NOT NULL,
        to_symbol_id TEXT,
        file_id TEXT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
        line INTEGER NOT NULL,
        is_external INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_call_edges_file ON call_edges (file_id)",
    r#"
    CREATE TABLE IF NOT EXISTS import_edges (
        from_file_id TEXT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
        to_file_id TEXT,
        to_module_name TEXT NOT NULL,
        kind TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS embeddings (
        symbol_id TEXT PRIMARY KEY REFERENCES symbols(id) ON DELETE CASCADE,
        dim INTEGER NOT NULL,
        vector BLOB NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS vulnerabilities (
        id TEXT PRIMARY KEY,
        repo_id TEXT NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
        file_id TEXT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
        line INTEGER NOT NULL,
        rule_id TEXT NOT NULL,
        severity TEXT NOT NULL,
        cwe TEXT,
        category TEXT NOT NULL,
        description TEXT NOT NULL,
        recommendation TEXT NOT NULL DEFAULT '',
        confidence TEXT NOT NULL,
        code_snippet TEXT NOT NULL DEFAULT ''
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_vulns_repo ON vulnerabilities (repo_id)",
    r#"
    CREATE TABLE IF NOT EXISTS code_smells (
        id TEXT PRIMARY KEY,
        repo_id TEXT NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
        smell_type TEXT NOT NULL,
        severity TEXT NOT NULL,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        suggestion TEXT NOT NULL DEFAULT '',
        file_id TEXT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
        symbol_id TEXT,
        line_start INTEGER NOT NULL DEFAULT 0,
        line_end INTEGER NOT NULL DEFAULT 0,
        metric_value INTEGER,
        metric_threshold INTEGER
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_smells_repo ON code_smells (repo_id)",
    r#"
    CREATE TABLE IF NOT EXISTS duplication_pairs (
        id TEXT PRIMARY KEY,
        repo_id TEXT NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
        file1_id TEXT NOT NULL,
        file1_start INTEGER NOT NULL,
        file1_end INTEGER NOT NULL,
        file2_id TEXT NOT NULL,
        file2_start INTEGER NOT NULL,
        file2_end INTEGER NOT NULL,
        similarity REAL NOT NULL,
        duplicate_lines INTEGER NOT NULL,
        duplicate_tokens INTEGER NOT NULL,
        snippet TEXT NOT NULL DEFAULT ''
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS dead_code (
        repo_id TEXT NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
        symbol_id TEXT NOT NULL,
        name TEXT NOT NULL,
        file_path TEXT NOT NULL,
        out_calls INTEGER NOT NULL,
        severity TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cycles (
        id TEXT PRIMARY KEY,
        repo_id TEXT NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
        members TEXT NOT NULL,
        size INTEGER NOT NULL,
        severity TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS quality_gates (
        repo_id TEXT PRIMARY KEY REFERENCES repositories(id) ON DELETE CASCADE,
        max_complexity INTEGER NOT NULL DEFAULT 10,
        max_code_smells INTEGER NOT NULL DEFAULT 20,
        max_critical_smells INTEGER NOT NULL DEFAULT 0,
        max_vulnerabilities INTEGER NOT NULL DEFAULT 5,
        max_critical_vulnerabilities INTEGER NOT NULL DEFAULT 0,
        min_quality_score REAL NOT NULL DEFAULT 70.0,
        max_duplication_percentage REAL NOT NULL DEFAULT 10.0,
        block_on_failure INTEGER NOT NULL DEFAULT 1
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cicd_runs (
        id TEXT PRIMARY KEY,
        repo_id TEXT NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
        branch TEXT,
        commit_sha TEXT,
        pr_number INTEGER,
        pr_title TEXT,
        triggered_by TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'running',
        gate_result TEXT,
        report_html TEXT,
        created_at TEXT NOT NULL,
        completed_at TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_runs_repo ON cicd_runs (repo_id, created_at)",
];
