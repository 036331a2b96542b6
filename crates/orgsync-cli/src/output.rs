//! Output formatting utilities.

use colored::Colorize;
use orgsync_core::{DirectoryUser, NestedOu, WholeOrg};
use tabled::{settings::Style, Table, Tabled};

use crate::config::OutputFormat;
use crate::CliResult;

/// Prints a success message.
pub fn success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Prints an error message.
pub fn error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Prints a warning message.
pub fn warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow().bold(), message);
}

/// Prints an info message.
pub fn info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Outputs rows in the specified format.
pub fn output<T: Tabled + serde::Serialize>(data: &[T], format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Table => {
            if data.is_empty() {
                info("No results found.");
            } else {
                println!("{}", render_table(data));
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(data)?);
        }
    }
    Ok(())
}

/// Outputs a single item as JSON.
pub fn output_json<T: serde::Serialize>(item: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(item)?);
    Ok(())
}

/// Renders rows as a rounded table.
pub fn render_table<T: Tabled>(data: &[T]) -> String {
    Table::new(data).with(Style::rounded()).to_string()
}

/// Renders an organization as an indented tree.
#[must_use]
pub fn render_org(org: &WholeOrg) -> String {
    let mut out = String::new();
    for unit in &org.ous {
        render_ou(unit, 0, &mut out);
    }
    if !org.users_not_in_ou.is_empty() {
        out.push_str(&format!("{}\n", "(no OU)".dimmed()));
        for user in &org.users_not_in_ou {
            render_user(user, 1, &mut out);
        }
    }
    out
}

fn render_ou(unit: &NestedOu, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    out.push_str(&format!("{indent}{} {}\n", unit.unit.ou.bold(), unit.unit.dn.dimmed()));
    for user in &unit.users {
        render_user(user, depth + 1, out);
    }
    for child in &unit.child_ous {
        render_ou(child, depth + 1, out);
    }
}

fn render_user(user: &DirectoryUser, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    let name = user
        .display_name
        .as_deref()
        .or(user.cn.as_deref())
        .unwrap_or(&user.dn);
    match &user.account_name {
        Some(account) => out.push_str(&format!("{indent}- {name} ({account})\n")),
        None => out.push_str(&format!("{indent}- {name}\n")),
    }
}

/// Prompts for password input (hidden).
pub fn prompt_password(prompt: &str) -> CliResult<String> {
    Ok(rpassword::prompt_password(prompt)?)
}

#[cfg(test)]
mod tests {
    use orgsync_core::OrganizationalUnit;

    use super::*;

    fn unit(dn: &str, ou: &str) -> OrganizationalUnit {
        OrganizationalUnit {
            dn: dn.to_string(),
            ou: ou.to_string(),
            ..OrganizationalUnit::default()
        }
    }

    #[test]
    fn renders_nested_tree() {
        colored::control::set_override(false);

        let mut eng = NestedOu::new(unit("ou=Eng,ou=Corp,dc=example,dc=com", "Eng"));
        eng.users.push(DirectoryUser {
            dn: "uid=ada,ou=Eng,ou=Corp,dc=example,dc=com".into(),
            display_name: Some("Ada Lovelace".into()),
            account_name: Some("ada".into()),
            ..DirectoryUser::default()
        });
        let mut corp = NestedOu::new(unit("ou=Corp,dc=example,dc=com", "Corp"));
        corp.child_ous.push(eng);
        let org = WholeOrg {
            ous: vec![corp],
            users_not_in_ou: vec![DirectoryUser {
                dn: "cn=svc,dc=example,dc=com".into(),
                ..DirectoryUser::default()
            }],
        };

        let rendered = render_org(&org);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "Corp ou=Corp,dc=example,dc=com");
        assert_eq!(lines[1], "  Eng ou=Eng,ou=Corp,dc=example,dc=com");
        assert_eq!(lines[2], "    - Ada Lovelace (ada)");
        assert_eq!(lines[3], "(no OU)");
        assert_eq!(lines[4], "  - cn=svc,dc=example,dc=com");
    }
}
