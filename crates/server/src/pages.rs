use shared::domain::RelayLayout;

const LOGIN_TEMPLATE: &str = include_str!("../assets/login.html");
const INDEX_TEMPLATE: &str = include_str!("../assets/index.html");
pub const HYMNAL_PAGE: &str = include_str!("../assets/hinario.html");

pub fn login(invalid_credentials: bool) -> String {
    let notice = if invalid_credentials {
        r#"<p class="alert">Usuário ou senha inválidos</p>"#
    } else {
        ""
    };
    LOGIN_TEMPLATE.replace("{{error}}", notice)
}

pub fn index(layout: &RelayLayout) -> String {
    INDEX_TEMPLATE.replace("{{relay_controls}}", &relay_controls(layout))
}

/// Group toggles first, then one toggle per row of lights.
fn relay_controls(layout: &RelayLayout) -> String {
    let mut html = String::from("<h3>Teto</h3>\n<div class=\"relays\">\n");
    for group in layout.groups() {
        let channels = group
            .channels
            .iter()
            .map(|channel| channel.to_string())
            .collect::<Vec<_>>()
            .join(",");
        html.push_str(&format!(
            "<label>{label}<input type=\"checkbox\" data-relay=\"{name}\" data-channels=\"{channels}\"></label>\n",
            label = escape_html(&group.label),
            name = escape_html(&group.name),
        ));
    }
    html.push_str("</div>\n<h3>Fileiras</h3>\n<div class=\"relays\">\n");
    for channel in 1..=layout.channel_count() {
        html.push_str(&format!(
            "<label>Fileira {channel}<input type=\"checkbox\" data-relay=\"{channel}\"></label>\n"
        ));
    }
    html.push_str("</div>");
    html
}

pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
