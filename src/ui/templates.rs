// Page bodies; wrapped by `layout`

use super::{html_escape, PageContext};
use crate::db::{
    CommentWithAuthor, Contributor, ResourceArticle, ResourceFields, ResourceWithAuthor,
    UserSummary, RESOURCE_POST_TYPE,
};

/// Plain text to paragraphs, blank lines separate paragraphs
pub fn paragraphs(text: &str) -> String {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| format!("<p>{}</p>", html_escape(p).replace('\n', "<br>")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Date part of a stored timestamp
fn date(ts: &str) -> &str {
    ts.get(..10).unwrap_or(ts)
}

pub fn home_page(ctx: &PageContext, recent: &[ResourceArticle]) -> String {
    let greeting = match &ctx.display_name {
        Some(name) => format!("<p>Welcome back, {}.</p>", html_escape(name)),
        None => r#"<p>A community for optometry professionals. <a href="/register">Join</a> to contribute.</p>"#
            .to_string(),
    };
    format!(
        r#"        <section class="hero">
            <h1>OptoHub</h1>
            {greeting}
        </section>
        <section>
            <h2>Latest resources</h2>
            {list}
        </section>"#,
        greeting = greeting,
        list = resource_items(recent),
    )
}

fn resource_items(articles: &[ResourceArticle]) -> String {
    if articles.is_empty() {
        return "<p class=\"empty\">No resources yet.</p>".to_string();
    }
    let items: Vec<String> = articles
        .iter()
        .map(|a| {
            format!(
                r#"<li><a href="/resources/{slug}">{title}</a> <span class="muted">{subtitle}</span> <time>{updated}</time></li>"#,
                slug = html_escape(&a.slug),
                title = html_escape(&a.title),
                subtitle = html_escape(&a.subtitle),
                updated = date(&a.updated_at),
            )
        })
        .collect();
    format!("<ul class=\"resources\">\n{}\n</ul>", items.join("\n"))
}

pub fn login_page(email: &str) -> String {
    format!(
        r#"        <section class="auth-form">
            <h1>Log in</h1>
            <form method="post" action="/login">
                <label>Email <input type="email" name="email" value="{email}" required autofocus></label>
                <label>Password <input type="password" name="password" required></label>
                <button type="submit">Log in</button>
            </form>
            <p><a href="/forgot-password">Forgot your password?</a></p>
            <p>New here? <a href="/register">Create an account</a></p>
        </section>"#,
        email = html_escape(email),
    )
}

pub fn register_page(fname: &str, lname: &str, email: &str) -> String {
    format!(
        r#"        <section class="auth-form">
            <h1>Join OptoHub</h1>
            <form method="post" action="/register">
                <label>First name <input type="text" name="fname" value="{fname}" required></label>
                <label>Last name <input type="text" name="lname" value="{lname}" required></label>
                <label>Email <input type="email" name="email" value="{email}" required></label>
                <label>Password <input type="password" name="password" minlength="8" required></label>
                <label>Confirm password <input type="password" name="confirm_password" minlength="8" required></label>
                <button type="submit">Create account</button>
            </form>
            <p>Already a member? <a href="/login">Log in</a></p>
        </section>"#,
        fname = html_escape(fname),
        lname = html_escape(lname),
        email = html_escape(email),
    )
}

pub fn forgot_password_page() -> String {
    r#"        <section class="auth-form">
            <h1>Forgot password</h1>
            <p>Enter your email and we'll send you a link to choose a new password.</p>
            <form method="post" action="/forgot-password">
                <label>Email <input type="email" name="email" required autofocus></label>
                <button type="submit">Send reset link</button>
            </form>
        </section>"#
        .to_string()
}

pub fn reset_password_page(token: &str) -> String {
    format!(
        r#"        <section class="auth-form">
            <h1>Choose a new password</h1>
            <form method="post" action="/reset-password/{token}">
                <label>New password <input type="password" name="password" minlength="8" required autofocus></label>
                <label>Confirm password <input type="password" name="confirm_password" minlength="8" required></label>
                <button type="submit">Set password</button>
            </form>
        </section>"#,
        token = html_escape(token),
    )
}

pub fn account_page(user: &UserSummary) -> String {
    format!(
        r#"        <section class="account">
            <h1>Your account</h1>
            <form method="post" action="/account">
                <h2>Profile</h2>
                <label>First name <input type="text" name="fname" value="{fname}" required></label>
                <label>Last name <input type="text" name="lname" value="{lname}" required></label>
                <label>Email <input type="email" name="email" value="{email}" required></label>
                <button type="submit">Save profile</button>
            </form>
            <form method="post" action="/account/password">
                <h2>Password</h2>
                <label>Current password <input type="password" name="current_password" required></label>
                <label>New password <input type="password" name="password" minlength="8" required></label>
                <label>Confirm new password <input type="password" name="confirm_password" minlength="8" required></label>
                <button type="submit">Change password</button>
            </form>
            <form method="post" action="/account/delete" class="danger">
                <h2>Delete account</h2>
                <p>Your comments are removed. Resources you wrote stay, credited to a former member.</p>
                <label>Password <input type="password" name="password" required></label>
                <button type="submit">Delete my account</button>
            </form>
            <p class="muted">Member since {since}</p>
        </section>"#,
        fname = html_escape(&user.fname),
        lname = html_escape(&user.lname),
        email = html_escape(&user.email),
        since = date(&user.created_at),
    )
}

pub fn admin_users_page(users: &[UserSummary], current_user_id: &str) -> String {
    let rows: Vec<String> = users
        .iter()
        .map(|u| {
            let actions = if u.id == current_user_id {
                r#"<td colspan="2" class="muted">You</td>"#.to_string()
            } else {
                format!(
                    r#"<td><form method="post" action="/admin/users/{id}/role"><button type="submit">Make {next_role}</button></form></td>
                <td><form method="post" action="/admin/users/{id}/active"><button type="submit">{toggle}</button></form></td>"#,
                    id = html_escape(&u.id),
                    next_role = u.role.toggled(),
                    toggle = if u.active { "Deactivate" } else { "Activate" },
                )
            };
            format!(
                r#"            <tr>
                <td>{name}</td>
                <td>{email}</td>
                <td>{role}</td>
                <td>{status}</td>
                <td>{joined}</td>
                {actions}
            </tr>"#,
                name = html_escape(&u.display_name()),
                email = html_escape(&u.email),
                role = u.role,
                status = if u.active { "active" } else { "inactive" },
                joined = date(&u.created_at),
                actions = actions,
            )
        })
        .collect();

    format!(
        r#"        <section class="admin">
            <h1>Members</h1>
            <table>
            <thead><tr><th>Name</th><th>Email</th><th>Role</th><th>Status</th><th>Joined</th><th colspan="2"></th></tr></thead>
            <tbody>
{rows}
            </tbody>
            </table>
        </section>"#,
        rows = rows.join("\n"),
    )
}

pub fn resources_list_page(ctx: &PageContext, articles: &[ResourceArticle]) -> String {
    let new_link = if ctx.is_authenticated() {
        r#"<p><a href="/resources/new" class="button">Write a resource</a></p>"#
    } else {
        ""
    };
    format!(
        r#"        <section>
            <h1>Resources</h1>
            {new_link}
            {list}
        </section>"#,
        new_link = new_link,
        list = resource_items(articles),
    )
}

/// Create/edit form; `action` is the form target
pub fn resource_form_page(heading: &str, action: &str, fields: &ResourceFields) -> String {
    format!(
        r#"        <section class="resource-form">
            <h1>{heading}</h1>
            <form method="post" action="{action}">
                <label>Title <input type="text" name="title" value="{title}" required></label>
                <label>Subtitle <input type="text" name="subtitle" value="{subtitle}"></label>
                <label>Content <textarea name="content" rows="16">{content}</textarea></label>
                <button type="submit">Save</button>
            </form>
        </section>"#,
        heading = html_escape(heading),
        action = html_escape(action),
        title = html_escape(&fields.title),
        subtitle = html_escape(&fields.subtitle),
        content = html_escape(&fields.content),
    )
}

fn comment_item(ctx: &PageContext, comment: &CommentWithAuthor) -> String {
    let controls = if ctx.is_user(&comment.user_id) {
        format!(
            r#"
                <details><summary>Edit</summary>
                    <form method="post" action="/comments/{id}/edit">
                        <textarea name="content" rows="3">{content}</textarea>
                        <button type="submit">Update</button>
                    </form>
                </details>
                <form method="post" action="/comments/{id}/delete" class="inline"><button type="submit">Delete</button></form>"#,
            id = html_escape(&comment.id),
            content = html_escape(&comment.content),
        )
    } else {
        String::new()
    };
    format!(
        r#"            <li class="comment">
                <p class="meta">{author} <time>{when}</time></p>
                {body}{controls}
            </li>"#,
        author = html_escape(&format!("{} {}", comment.fname, comment.lname)),
        when = date(&comment.created_at),
        body = paragraphs(&comment.content),
        controls = controls,
    )
}

pub fn resource_detail_page(
    ctx: &PageContext,
    article: &ResourceWithAuthor,
    contributors: &[Contributor],
    comments: &[CommentWithAuthor],
) -> String {
    let contributor_names: Vec<String> = contributors
        .iter()
        .map(|c| html_escape(&format!("{} {}", c.fname, c.lname)))
        .collect();

    let edit_link = if ctx.is_authenticated() {
        format!(
            r#"<p><a href="/resources/{}/edit">Edit this resource</a></p>"#,
            html_escape(&article.slug)
        )
    } else {
        String::new()
    };

    let comment_form = if ctx.is_authenticated() {
        format!(
            r#"<form method="post" action="/comments/new">
                <input type="hidden" name="post_id" value="{id}">
                <input type="hidden" name="post_type" value="{post_type}">
                <textarea name="content" rows="3" placeholder="Add a comment"></textarea>
                <button type="submit">Comment</button>
            </form>"#,
            id = html_escape(&article.id),
            post_type = RESOURCE_POST_TYPE,
        )
    } else {
        r#"<p><a href="/login">Log in</a> to comment.</p>"#.to_string()
    };

    let comment_items: Vec<String> = comments.iter().map(|c| comment_item(ctx, c)).collect();

    format!(
        r#"        <article class="resource">
            <h1>{title}</h1>
            <p class="subtitle">{subtitle}</p>
            <p class="meta">By {author} · updated <time>{updated}</time></p>
            {edit_link}
            <div class="content">
{content}
            </div>
            <p class="contributors">Contributors: {contributors}</p>
        </article>
        <section class="comments">
            <h2>Comments ({count})</h2>
            {comment_form}
            <ul>
{comments}
            </ul>
        </section>"#,
        title = html_escape(&article.title),
        subtitle = html_escape(&article.subtitle),
        author = html_escape(&article.author_name()),
        updated = date(&article.updated_at),
        edit_link = edit_link,
        content = paragraphs(&article.content),
        contributors = contributor_names.join(", "),
        count = comments.len(),
        comment_form = comment_form,
        comments = comment_items.join("\n"),
    )
}
