use crate::models::models::User;

fn reset_link(base_url: &str, token: &str) -> String {
    format!(
        "{}/reset_password/{}",
        base_url.trim_end_matches('/'),
        urlencoding::encode(token)
    )
}

pub fn reset_password_text(user: &User, base_url: &str, token: &str) -> String {
    format!(
        "Dear {},\n\
         \n\
         To reset your password click on the following link:\n\
         \n\
         {}\n\
         \n\
         If you have not requested a password reset simply ignore this message.\n\
         \n\
         Sincerely,\n\
         \n\
         The Microblog Team\n",
        user.username,
        reset_link(base_url, token)
    )
}

pub fn reset_password_html(user: &User, base_url: &str, token: &str) -> String {
    let link = reset_link(base_url, token);
    let escaped_link = html_escape::encode_double_quoted_attribute(&link);

    format!(
        r#"<p>Dear {username},</p>
<p>
    To reset your password
    <a href="{href}">click here</a>.
</p>
<p>Alternatively, you can paste the following link in your browser's address bar:</p>
<p>{text}</p>
<p>If you have not requested a password reset simply ignore this message.</p>
<p>Sincerely,</p>
<p>The Microblog Team</p>
"#,
        username = html_escape::encode_text(&user.username),
        href = escaped_link,
        text = html_escape::encode_text(&link),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> User {
        User {
            id: 7,
            username: name.to_string(),
            email: "x@example.com".to_string(),
            password_hash: None,
            about_me: None,
            last_seen: None,
        }
    }

    #[test]
    fn test_text_body_contains_link() {
        let body = reset_password_text(&user("susan"), "http://localhost:8080/", "abc.def.ghi");
        assert!(body.starts_with("Dear susan,"));
        assert!(body.contains("http://localhost:8080/reset_password/abc.def.ghi\n"));
    }

    #[test]
    fn test_html_body_escapes_username() {
        let body = reset_password_html(&user("<b>eve</b>"), "http://localhost:8080", "tok");
        assert!(body.contains("Dear &lt;b&gt;eve&lt;/b&gt;,"));
        assert!(body.contains(r#"href="http://localhost:8080/reset_password/tok""#));
    }
}
