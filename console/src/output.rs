use collection_sync::{Child, Guardian, Notice, NoticeLevel, Notification, View};

pub fn guardian_line(guardian: &Guardian, view: &View<Guardian>) -> String {
    let children = if view.join_failures.contains_key(&guardian.id) {
        "(children unavailable)".to_string()
    } else if guardian.children.is_empty() {
        "-".to_string()
    } else {
        guardian
            .children
            .iter()
            .map(Child::full_name)
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        "{}{}  {}  <{}>  children: {}",
        marker(view.selected.contains(&guardian.id)),
        guardian.id,
        guardian.full_name(),
        guardian.email,
        children
    )
}

pub fn child_line(child: &Child, guardian: Option<&Guardian>) -> String {
    let holder = guardian.map_or_else(|| "unassigned".to_string(), Guardian::full_name);
    format!("  {}  {}  [{}]", child.id, child.full_name(), holder)
}

pub fn notification_line(notification: &Notification, view: &View<Notification>) -> String {
    format!(
        "{}{} {}  [{}]  {}: {}",
        marker(view.selected.contains(&notification.id)),
        if notification.read { " " } else { "*" },
        notification.id,
        notification.kind,
        notification.title,
        notification.message
    )
}

pub fn notice_line(notice: &Notice) -> String {
    let level = match notice.level {
        NoticeLevel::Success => "ok",
        NoticeLevel::Error => "error",
    };
    format!("[{level}] {}", notice.message)
}

fn marker(selected: bool) -> &'static str {
    if selected { "> " } else { "  " }
}
