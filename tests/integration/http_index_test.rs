// tests/integration/http_index_test.rs

//! Tests for extracting directory entries from generated HTTP index pages.

use lockstep::core::protocol::DirectoryEntry;
use lockstep::core::resource::http_index::parse_index;
use url::Url;

fn base() -> Url {
    Url::parse("http://files.example:8080/pub/data/").unwrap()
}

#[test]
fn test_apache_style_index() {
    let body = r#"
<table>
<tr><th><a href="?C=N;O=D">Name</a></th><th><a href="?C=S;O=A">Size</a></th></tr>
<tr><td><a href="/pub/">Parent Directory</a></td></tr>
<tr><td><a href="notes.txt">notes.txt</a></td><td>12K</td></tr>
<tr><td><a href="images/">images/</a></td><td>-</td></tr>
<tr><td><a href="archive.tar.gz">archive.tar.gz</a></td><td>3M</td></tr>
</table>"#;
    assert_eq!(
        parse_index(body, &base()),
        vec![
            DirectoryEntry::file("archive.tar.gz"),
            DirectoryEntry::directory("images"),
            DirectoryEntry::file("notes.txt"),
        ]
    );
}

#[test]
fn test_nginx_style_index() {
    let body = "<html><body><h1>Index of /pub/data/</h1><hr><pre>\
<a href=\"../\">../</a>\n\
<a href=\"logs/\">logs/</a>      01-Jan-2024 00:00    -\n\
<a href=\"readme.md\">readme.md</a> 01-Jan-2024 00:00  120\n\
</pre><hr></body></html>";
    assert_eq!(
        parse_index(body, &base()),
        vec![
            DirectoryEntry::directory("logs"),
            DirectoryEntry::file("readme.md"),
        ]
    );
}

#[test]
fn test_quoting_styles_and_case() {
    let body = r#"<A HREF='single.txt'>x</A> <a href=bare.txt>y</a> <a  href = "spaced.txt">z</a>"#;
    assert_eq!(
        parse_index(body, &base()),
        vec![
            DirectoryEntry::file("bare.txt"),
            DirectoryEntry::file("single.txt"),
            DirectoryEntry::file("spaced.txt"),
        ]
    );
}

#[test]
fn test_absolute_links_on_same_origin_are_kept() {
    let body = r#"
<a href="/pub/data/abs.txt">abs</a>
<a href="http://files.example:8080/pub/data/full.txt">full</a>
<a href="http://files.example/pub/data/other-port.txt">other port</a>
<a href="https://files.example:8080/pub/data/other-scheme.txt">other scheme</a>
<a href="http://mirror.example:8080/pub/data/other-host.txt">other host</a>"#;
    assert_eq!(
        parse_index(body, &base()),
        vec![DirectoryEntry::file("abs.txt"), DirectoryEntry::file("full.txt")]
    );
}

#[test]
fn test_only_direct_children_are_listed() {
    let body = r##"
<a href="child.txt">ok</a>
<a href="deeper/nested.txt">too deep</a>
<a href="/pub/sibling.txt">outside</a>
<a href="./">self</a>
<a href=".">dot</a>
<a href="">empty</a>
<a href="#top">fragment</a>"##;
    assert_eq!(
        parse_index(body, &base()),
        vec![DirectoryEntry::file("child.txt")]
    );
}

#[test]
fn test_names_are_percent_decoded() {
    let body = r#"<a href="my%20file.txt">my file.txt</a><a href="caf%C3%A9/">café/</a>"#;
    assert_eq!(
        parse_index(body, &base()),
        vec![
            DirectoryEntry::directory("café"),
            DirectoryEntry::file("my file.txt"),
        ]
    );
}

#[test]
fn test_duplicates_collapse_and_directories_win() {
    let body = r#"
<a href="x.txt">x.txt</a><a href="x.txt">again</a>
<a href="both">both</a><a href="both/">both/</a>
<a href="x.txt?download=1">download</a>"#;
    assert_eq!(
        parse_index(body, &base()),
        vec![DirectoryEntry::directory("both"), DirectoryEntry::file("x.txt")]
    );
}

#[test]
fn test_page_without_links_is_empty() {
    assert!(parse_index("<html><body>Nothing here</body></html>", &base()).is_empty());
}
