// src/pages.rs
//! Bare HTML forms served on GET. Data views answer JSON instead.

fn page(title: &str, action: &str, fields: &str, submit: &str) -> String {
    format!(
        concat!(
            "<!DOCTYPE html>\n",
            "<html lang=\"en\">\n",
            "<head><meta charset=\"utf-8\"><title>C$50 Finance: {title}</title></head>\n",
            "<body>\n",
            "<form action=\"{action}\" method=\"post\">\n",
            "{fields}",
            "<button type=\"submit\">{submit}</button>\n",
            "</form>\n",
            "</body>\n",
            "</html>\n"
        ),
        title = title,
        action = action,
        fields = fields,
        submit = submit,
    )
}

fn input(name: &str, kind: &str, placeholder: &str) -> String {
    format!(
        "<input autocomplete=\"off\" name=\"{}\" type=\"{}\" placeholder=\"{}\" required>\n",
        name, kind, placeholder
    )
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn login() -> String {
    let fields = input("username", "text", "Username") + &input("password", "password", "Password");
    page("Log In", "/login", &fields, "Log In")
}

pub fn register() -> String {
    let fields = input("username", "text", "Username")
        + &input("password", "password", "Password")
        + &input("confirmation", "password", "Password (again)");
    page("Register", "/register", &fields, "Register")
}

pub fn quote() -> String {
    page("Quote", "/quote", &input("symbol", "text", "Symbol"), "Quote")
}

pub fn buy() -> String {
    let fields = input("symbol", "text", "Symbol")
        + "<input name=\"shares\" type=\"number\" min=\"1\" step=\"1\" placeholder=\"Shares\" required>\n";
    page("Buy", "/buy", &fields, "Buy")
}

pub fn sell<'a>(symbols: impl IntoIterator<Item = &'a str>) -> String {
    let mut fields = String::from("<select name=\"symbol\" required>\n<option disabled selected value=\"\">Symbol</option>\n");
    for symbol in symbols {
        let symbol = escape(symbol);
        fields.push_str(&format!("<option value=\"{0}\">{0}</option>\n", symbol));
    }
    fields.push_str("</select>\n");
    fields.push_str(
        "<input name=\"shares\" type=\"number\" min=\"1\" step=\"1\" placeholder=\"Shares\" required>\n",
    );
    page("Sell", "/sell", &fields, "Sell")
}

pub fn password() -> String {
    let fields = input("oldpass", "password", "Current password")
        + &input("newpass", "password", "New password")
        + &input("confirm", "password", "New password (again)");
    page("Change Password", "/password", &fields, "Change Password")
}
