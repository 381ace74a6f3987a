//! HTML injection.
//!
//! Runs the document through a streaming `lol_html` rewriter:
//!
//! ```text
//! <head>           → prepend location shim (+ service worker registration)
//!                    (no <head>: prepend to <html>, else before the first element)
//! <meta http-equiv> → dropped when it carries a CSP and remove_meta_csp is set
//! inline <script>  → body passed through rewrite_javascript(.., false)
//! ```

use std::cell::{Cell, RefCell};

use lol_html::html_content::{ContentType, Element};
use lol_html::{element, end, text, HtmlRewriter, Settings};

use crate::rewrite::assets::{location_shim_tag, sw_registration_tag};
use crate::rewrite::javascript::rewrite_javascript;
use crate::rewrite::RewriteError;

/// Per-response switches for the HTML pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HtmlRewriteOptions {
    pub skip_service_worker: bool,
    pub remove_meta_csp: bool,
}

/// Script `type` values that hold classic or module JavaScript.
const JS_SCRIPT_TYPES: [&str; 6] = [
    "",
    "text/javascript",
    "application/javascript",
    "text/ecmascript",
    "application/ecmascript",
    "module",
];

/// Inject the location shim and rewrite inline scripts.
pub fn rewrite_html(input: &[u8], options: HtmlRewriteOptions) -> Result<Vec<u8>, RewriteError> {
    let mut injection = location_shim_tag();
    if !options.skip_service_worker {
        injection.push_str(&sw_registration_tag());
    }

    let anchor = find_anchor(input)?;
    let injected = Cell::new(false);
    let inline_js = Cell::new(false);
    let script_source = RefCell::new(String::new());

    let mut output = Vec::with_capacity(input.len() + injection.len());

    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![
                element!(anchor.selector(), |el| {
                    if !injected.replace(true) {
                        match anchor {
                            // after any doctype, before the first element
                            Anchor::Element => el.before(&injection, ContentType::Html),
                            Anchor::Head | Anchor::Html => {
                                el.prepend(&injection, ContentType::Html)
                            }
                        }
                    }
                    Ok(())
                }),
                element!("meta[http-equiv]", |el| {
                    if options.remove_meta_csp && is_meta_csp(el) {
                        el.remove();
                    }
                    Ok(())
                }),
                element!("script", |el| {
                    inline_js.set(is_inline_javascript(el));
                    Ok(())
                }),
                text!("script", |chunk| {
                    if !inline_js.get() {
                        return Ok(());
                    }
                    script_source.borrow_mut().push_str(chunk.as_str());
                    if chunk.last_in_text_node() {
                        let source = script_source.take();
                        chunk.replace(&rewrite_javascript(&source, false), ContentType::Html);
                    } else {
                        chunk.remove();
                    }
                    Ok(())
                }),
            ],
            document_content_handlers: vec![end!(|end| {
                // text-only documents have no element to anchor on
                if !injected.replace(true) {
                    end.append(&injection, ContentType::Html);
                }
                Ok(())
            })],
            ..Settings::new()
        },
        |chunk: &[u8]| output.extend_from_slice(chunk),
    );
    rewriter.write(input)?;
    rewriter.end()?;

    Ok(output)
}

/// Where the injected scripts go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Anchor {
    Head,
    Html,
    Element,
}

impl Anchor {
    fn selector(self) -> &'static str {
        match self {
            Anchor::Head => "head",
            Anchor::Html => "html",
            Anchor::Element => "*",
        }
    }
}

fn find_anchor(input: &[u8]) -> Result<Anchor, RewriteError> {
    let has_head = Cell::new(false);
    let has_html = Cell::new(false);
    let mut scanner = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![
                element!("head", |_el| {
                    has_head.set(true);
                    Ok(())
                }),
                element!("html", |_el| {
                    has_html.set(true);
                    Ok(())
                }),
            ],
            ..Settings::new()
        },
        |_: &[u8]| {},
    );
    scanner.write(input)?;
    scanner.end()?;

    Ok(if has_head.get() {
        Anchor::Head
    } else if has_html.get() {
        Anchor::Html
    } else {
        Anchor::Element
    })
}

fn is_meta_csp(el: &Element<'_, '_>) -> bool {
    el.get_attribute("http-equiv")
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("content-security-policy"))
}

fn is_inline_javascript(el: &Element<'_, '_>) -> bool {
    if el.has_attribute("src") {
        return false;
    }
    let script_type = el
        .get_attribute("type")
        .map(|t| t.trim().to_ascii_lowercase())
        .unwrap_or_default();
    JS_SCRIPT_TYPES.contains(&script_type.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewrite::assets::{LOCATION_SHIM_JS, SW_REGISTRATION_JS};

    fn rewrite(input: &str, options: HtmlRewriteOptions) -> String {
        String::from_utf8(rewrite_html(input.as_bytes(), options).unwrap()).unwrap()
    }

    #[test]
    fn shim_is_first_child_of_head() {
        let out = rewrite(
            "<html><head></head><body></body></html>",
            HtmlRewriteOptions::default(),
        );
        assert!(out.starts_with("<html><head><script data-cmux-injected=\"location-shim\">"));
        assert!(out.contains(LOCATION_SHIM_JS));
        assert!(out.contains("navigator.serviceWorker.register"));
        assert!(out.ends_with("</head><body></body></html>"));
    }

    #[test]
    fn service_worker_registration_follows_shim_unless_skipped() {
        let input = "<html><head><title>Demo</title></head><body>Hello</body></html>";
        let out = rewrite(input, HtmlRewriteOptions::default());
        let shim_at = out.find("location-shim").unwrap();
        let sw_at = out.find(SW_REGISTRATION_JS).unwrap();
        let title_at = out.find("<title>").unwrap();
        assert!(shim_at < sw_at && sw_at < title_at);

        let skipped = rewrite(
            input,
            HtmlRewriteOptions {
                skip_service_worker: true,
                remove_meta_csp: true,
            },
        );
        assert!(skipped.contains("window.__cmuxLocation"));
        assert!(!skipped.contains("navigator.serviceWorker.register"));
    }

    #[test]
    fn meta_csp_is_removed_only_when_requested() {
        let input = "<html><head><meta http-equiv=\"Content-Security-Policy\" \
                     content=\"default-src 'self'\"><meta charset=\"utf-8\"></head></html>";
        let kept = rewrite(input, HtmlRewriteOptions::default());
        assert!(kept.contains("Content-Security-Policy"));

        let removed = rewrite(
            input,
            HtmlRewriteOptions {
                skip_service_worker: true,
                remove_meta_csp: true,
            },
        );
        assert!(!removed.contains("Content-Security-Policy"));
        assert!(removed.contains("<meta charset=\"utf-8\">"));
    }

    #[test]
    fn meta_csp_match_is_case_insensitive() {
        let input = "<head><META HTTP-EQUIV=\"content-security-policy\" content=\"x\"></head>";
        let out = rewrite(
            input,
            HtmlRewriteOptions {
                skip_service_worker: false,
                remove_meta_csp: true,
            },
        );
        assert!(!out.to_ascii_lowercase().contains("http-equiv"));
    }

    #[test]
    fn inline_javascript_is_rewritten() {
        let out = rewrite(
            "<head></head><body><script>window.location.href = '/x';</script>\
             <script type=\"module\">const u = location.href;</script></body>",
            HtmlRewriteOptions::default(),
        );
        assert!(out.contains("<script>window.__cmuxLocation.href = '/x';</script>"));
        assert!(out.contains("<script type=\"module\">const u = __cmuxLocation.href;</script>"));
    }

    #[test]
    fn non_javascript_scripts_are_untouched() {
        let input = "<head></head><body>\
                     <script type=\"application/json\">{\"a\": \"window.location\"}</script>\
                     <script src=\"/app.js\">window.location</script></body>";
        let out = rewrite(input, HtmlRewriteOptions::default());
        assert!(out.contains("{\"a\": \"window.location\"}"));
        assert!(out.contains("<script src=\"/app.js\">window.location</script>"));
    }

    #[test]
    fn documents_without_head_still_get_the_shim() {
        let out = rewrite(
            "<html><body>hi</body></html>",
            HtmlRewriteOptions::default(),
        );
        assert!(out.starts_with("<html><script data-cmux-injected=\"location-shim\">"));

        let fragment = rewrite("<p>hi</p>", HtmlRewriteOptions::default());
        assert!(fragment.starts_with("<script data-cmux-injected=\"location-shim\">"));
        assert!(fragment.ends_with("<p>hi</p>"));
    }

    #[test]
    fn doctype_stays_first_when_head_is_implied() {
        let out = rewrite(
            "<!DOCTYPE html><title>x</title><p>hi</p>",
            HtmlRewriteOptions::default(),
        );
        assert!(out.starts_with("<!DOCTYPE html><script data-cmux-injected=\"location-shim\">"));
        assert!(out.ends_with("<title>x</title><p>hi</p>"));
        assert_eq!(out.matches("location-shim").count(), 1);
    }

    #[test]
    fn text_only_documents_get_the_shim_appended() {
        let out = rewrite("just text", HtmlRewriteOptions::default());
        assert!(out.starts_with("just text<script data-cmux-injected=\"location-shim\">"));
        assert!(out.contains(LOCATION_SHIM_JS));
    }

    #[test]
    fn only_first_head_is_injected() {
        let out = rewrite(
            "<head></head><head></head>",
            HtmlRewriteOptions::default(),
        );
        assert_eq!(out.matches("location-shim").count(), 1);
    }
}
