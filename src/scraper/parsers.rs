use crate::config::InvalidRowPolicy;
use crate::errors::{IngestError, RowError};
use crate::models::SaleListingRow;
use crate::scraper::cleaner::{extract_app_id, format_epoch, image_link};
use anyhow::Result;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

// ── Sales listing ─────────────────────────────────────────────────────────────

// Positional cells of a `tr.app` row on steamdb.info/sales
const PRICE_CELL: usize = 4;
const RATING_CELL: usize = 5;
const RELEASE_CELL: usize = 6;
const ENDS_CELL: usize = 7;
const STARTS_CELL: usize = 8;

struct ListingSelectors {
    row: Selector,
    name: Selector,
    discount: Selector,
    td: Selector,
    link: Selector,
}

impl ListingSelectors {
    fn new() -> Result<Self> {
        let parse = |s: &str| {
            Selector::parse(s).map_err(|e| anyhow::anyhow!("selector {:?}: {:?}", s, e))
        };
        Ok(Self {
            row: parse("tr.app")?,
            name: parse(".b")?,
            discount: parse(".price-discount")?,
            td: parse("td")?,
            link: parse(".info-icon")?,
        })
    }
}

fn text_of(el: Option<ElementRef<'_>>) -> String {
    el.map(|e| e.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

/// One outcome per `tr.app`, in document order.
pub fn parse_listing_rows(html: &str) -> Result<Vec<Result<SaleListingRow, RowError>>> {
    let doc = Html::parse_document(html);
    let sel = ListingSelectors::new()?;

    let outcomes = doc
        .select(&sel.row)
        .map(|tr| parse_row(tr, &sel))
        .collect::<Vec<_>>();

    debug!("{} listing rows in document", outcomes.len());
    Ok(outcomes)
}

fn parse_row(tr: ElementRef<'_>, sel: &ListingSelectors) -> Result<SaleListingRow, RowError> {
    let cells: Vec<ElementRef<'_>> = tr.select(&sel.td).collect();
    let cell = |i: usize| cells.get(i).copied();

    let detail_link = tr
        .select(&sel.link)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .ok_or(RowError::MissingLink)?;

    let app_id =
        extract_app_id(&detail_link).ok_or_else(|| RowError::MissingAppId(detail_link.clone()))?;

    Ok(SaleListingRow {
        name: text_of(tr.select(&sel.name).next()),
        discount: text_of(tr.select(&sel.discount).next()),
        price: text_of(cell(PRICE_CELL)),
        rating: text_of(cell(RATING_CELL)),
        release_date: text_of(cell(RELEASE_CELL)),
        sale_ends_at: format_epoch(cell(ENDS_CELL).and_then(|td| td.value().attr("data-sort"))),
        sale_starts_at: format_epoch(
            cell(STARTS_CELL).and_then(|td| td.value().attr("data-sort")),
        ),
        image_link: image_link(&app_id),
        detail_link,
        app_id,
    })
}

/// Parse the listing and apply the invalid-row policy.
pub fn extract_rows(html: &str, policy: InvalidRowPolicy) -> Result<Vec<SaleListingRow>> {
    let outcomes = parse_listing_rows(html)?;
    let mut rows = Vec::with_capacity(outcomes.len());

    for (index, outcome) in outcomes.into_iter().enumerate() {
        match (outcome, policy) {
            (Ok(row), _) => rows.push(row),
            (Err(source), InvalidRowPolicy::Abort) => {
                return Err(IngestError::RowExtraction { index, source }.into());
            }
            (Err(e), InvalidRowPolicy::Skip) => {
                warn!("Skipping listing row {}: {}", index, e);
            }
        }
    }

    Ok(rows)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn app_row(id: &str, name: &str, price: &str) -> String {
        format!(
            r#"<tr class="app" data-appid="{id}">
                <td><a href="/app/{id}/" class="info-icon">i</a></td>
                <td><img></td>
                <td><a class="b" href="/app/{id}/">{name}</a></td>
                <td class="price-discount">-75%</td>
                <td>{price}</td>
                <td>91.25%</td>
                <td>21 Aug 2012</td>
                <td data-sort="1731427200">in 6 days</td>
                <td data-sort="1730808000">1 day ago</td>
            </tr>"#
        )
    }

    fn page(rows: &[String]) -> String {
        format!(
            "<html><body><table id=\"DataTables_Table_0\"><tbody>{}</tbody></table></body></html>",
            rows.join("\n")
        )
    }

    #[test]
    fn extracts_every_field_of_a_row() {
        let html = page(&[app_row("730", "Counter-Strike 2", "₪49.90")]);
        let rows = extract_rows(&html, InvalidRowPolicy::Skip).unwrap();

        assert_eq!(rows.len(), 1);
        let r = &rows[0];
        assert_eq!(r.name, "Counter-Strike 2");
        assert_eq!(r.discount, "-75%");
        assert_eq!(r.price, "₪49.90");
        assert_eq!(r.rating, "91.25%");
        assert_eq!(r.release_date, "21 Aug 2012");
        assert_eq!(r.sale_ends_at, "12 Nov 2024");
        assert_eq!(r.sale_starts_at, "05 Nov 2024");
        assert_eq!(r.detail_link, "/app/730/");
        assert_eq!(r.app_id, "730");
        assert!(r.image_link.ends_with("/apps/730/capsule_231x87.jpg"));
    }

    #[test]
    fn preserves_document_order_without_dedup() {
        let html = page(&[
            app_row("10", "A", "1"),
            app_row("20", "B", "2"),
            app_row("10", "A", "1"),
        ]);
        let rows = extract_rows(&html, InvalidRowPolicy::Skip).unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.app_id.as_str()).collect();
        assert_eq!(ids, ["10", "20", "10"]);
    }

    #[test]
    fn missing_optional_cells_become_empty() {
        let html = page(&[r#"<tr class="app"><td><a class="info-icon" href="/app/42/">i</a></td></tr>"#
            .to_string()]);
        let rows = extract_rows(&html, InvalidRowPolicy::Skip).unwrap();

        assert_eq!(rows.len(), 1);
        let r = &rows[0];
        assert_eq!(r.app_id, "42");
        assert!(r.name.is_empty() && r.discount.is_empty() && r.price.is_empty());
        assert!(r.sale_ends_at.is_empty() && r.sale_starts_at.is_empty());
    }

    #[test]
    fn rows_without_app_id_are_reported_per_row() {
        let html = page(&[
            app_row("1", "Good", "1"),
            r#"<tr class="app"><td><a class="info-icon" href="/sub/99/">i</a></td></tr>"#.into(),
            r#"<tr class="app"><td>no link at all</td></tr>"#.into(),
        ]);
        let outcomes = parse_listing_rows(&html).unwrap();

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_ok());
        assert_eq!(outcomes[1], Err(RowError::MissingAppId("/sub/99/".into())));
        assert_eq!(outcomes[2], Err(RowError::MissingLink));
    }

    #[test]
    fn policy_decides_between_skip_and_abort() {
        let html = page(&[
            app_row("1", "Good", "1"),
            r#"<tr class="app"><td>broken</td></tr>"#.into(),
            app_row("2", "Also good", "2"),
        ]);

        let kept = extract_rows(&html, InvalidRowPolicy::Skip).unwrap();
        assert_eq!(kept.len(), 2);

        let err = extract_rows(&html, InvalidRowPolicy::Abort).unwrap_err();
        match err.downcast_ref::<IngestError>() {
            Some(IngestError::RowExtraction { index, source }) => {
                assert_eq!(*index, 1);
                assert_eq!(*source, RowError::MissingLink);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn page_without_rows_yields_nothing() {
        let rows = extract_rows("<html><body>Just a moment...</body></html>", InvalidRowPolicy::Abort)
            .unwrap();
        assert!(rows.is_empty());
    }
}
