use super::{
    HISTOGRAM_BINS, ListingTable, RANKING_SIZE, RankedGame, cheapest, most_discounted,
    price_histogram, price_vs_rating, promotions_by_start_month, top_priced,
    top_rated_affordable,
};
use crate::utils::escape_html;
use serde_json::{Value, json};
use std::fmt::Write;

const PLOTLY_CDN: &str = "https://cdn.plot.ly/plotly-2.35.2.min.js";

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub title: String,
    pub currency: String,
    pub affordable_price: f64,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            title: "Steam Sales Dashboard".to_string(),
            currency: "₪".to_string(),
            affordable_price: 20.0,
        }
    }
}

// ── Figures ───────────────────────────────────────────────────────────────────

fn histogram_figure(table: &ListingTable) -> Value {
    let bins = price_histogram(table, HISTOGRAM_BINS);
    let x: Vec<f64> = bins.iter().map(|b| (b.lower + b.upper) / 2.0).collect();
    let y: Vec<usize> = bins.iter().map(|b| b.count).collect();
    let width = bins.first().map(|b| b.upper - b.lower).unwrap_or(1.0);

    json!({
        "data": [{ "type": "bar", "x": x, "y": y, "width": width }],
        "layout": {
            "title": { "text": "Price distribution" },
            "xaxis": { "title": { "text": "Price" } },
            "yaxis": { "title": { "text": "Games" } },
            "bargap": 0.05
        }
    })
}

fn scatter_figure(table: &ListingTable) -> Value {
    let points = price_vs_rating(table);
    json!({
        "data": [{
            "type": "scatter",
            "mode": "markers",
            "x": points.iter().map(|p| p.price).collect::<Vec<_>>(),
            "y": points.iter().map(|p| p.rating).collect::<Vec<_>>(),
            "text": points.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            "hovertemplate": "%{text}<br>Price %{x}<br>Rating %{y}%<extra></extra>"
        }],
        "layout": {
            "title": { "text": "Price vs rating" },
            "xaxis": { "title": { "text": "Price" } },
            "yaxis": { "title": { "text": "Rating (%)" } }
        }
    })
}

fn monthly_figure(table: &ListingTable) -> Value {
    let months = promotions_by_start_month(table);
    json!({
        "data": [{
            "type": "bar",
            "x": months.iter().map(|m| m.month.format("%Y-%m-%d").to_string()).collect::<Vec<_>>(),
            "y": months.iter().map(|m| m.count).collect::<Vec<_>>(),
            "customdata": months.iter().map(|m| m.mean_duration_days).collect::<Vec<_>>(),
            "hovertemplate": "%{x|%b %Y}: %{y} promotions<br>mean length %{customdata:.1f} days<extra></extra>"
        }],
        "layout": {
            "title": { "text": "Promotions started per month" },
            "xaxis": { "title": { "text": "Start month" }, "type": "date" },
            "yaxis": { "title": { "text": "Promotions" } }
        }
    })
}

// ── HTML ──────────────────────────────────────────────────────────────────────

fn ranking_table(games: &[RankedGame], currency: &str) -> String {
    if games.is_empty() {
        return "<p class=\"empty\">No games match.</p>".to_string();
    }

    let mut html = String::from(
        "<table><thead><tr><th>#</th><th>Name</th><th>Price</th><th>Rating</th><th>Discount</th></tr></thead><tbody>",
    );
    for (i, g) in games.iter().enumerate() {
        let _ = write!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{}{:.2}</td><td>{:.2}%</td><td>{:.0}%</td></tr>",
            i + 1,
            escape_html(&g.name),
            escape_html(currency),
            g.price,
            g.rating,
            g.discount
        );
    }
    html.push_str("</tbody></table>");
    html
}

/// JSON is embedded in a `<script>` block; a literal `</` would end it early.
fn script_json(value: &Value) -> String {
    value.to_string().replace("</", "<\\/")
}

fn chart(html: &mut String, id: &str, figure: &Value) {
    let _ = write!(
        html,
        "<div id=\"{id}\" class=\"chart\"></div>\n<script>Plotly.newPlot(\"{id}\", {fig}.data, {fig}.layout, {{responsive: true}});</script>\n",
        id = id,
        fig = script_json(figure)
    );
}

pub fn render_page(table: &ListingTable, opts: &RenderOptions) -> String {
    let currency = &opts.currency;
    let cap = opts.affordable_price;
    let mut html = String::with_capacity(64 * 1024);

    let _ = write!(
        html,
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{title}</title>
<script src="{cdn}"></script>
<style>
body {{ font-family: system-ui, sans-serif; margin: 2rem auto; max-width: 1200px; color: #1d2733; }}
table {{ border-collapse: collapse; width: 100%; margin-bottom: 1.5rem; }}
th, td {{ border-bottom: 1px solid #dde3ea; padding: .35rem .6rem; text-align: left; }}
.chart {{ width: 100%; height: 420px; }}
.grid {{ display: grid; grid-template-columns: 1fr 1fr; gap: 1.5rem; }}
.empty {{ color: #7a8794; }}
</style>
</head>
<body>
<h1>{title}</h1>
<p>{n} games on sale in the current snapshot.</p>
"#,
        title = escape_html(&opts.title),
        cdn = PLOTLY_CDN,
        n = table.len()
    );

    html.push_str("<h2>Price distribution</h2>\n");
    chart(&mut html, "price-histogram", &histogram_figure(table));

    let _ = write!(
        html,
        "<div class=\"grid\">\n<section><h2>Top {n} most expensive</h2>{}</section>\n<section><h2>Top {n} cheapest</h2>{}</section>\n</div>\n",
        ranking_table(&top_priced(table, RANKING_SIZE), currency),
        ranking_table(&cheapest(table, RANKING_SIZE), currency),
        n = RANKING_SIZE
    );

    let _ = write!(
        html,
        "<div class=\"grid\">\n<section><h2>Best rated at {cur}{cap} or less</h2>{}</section>\n<section><h2>Deepest discounts</h2>{}</section>\n</div>\n",
        ranking_table(&top_rated_affordable(table, cap, RANKING_SIZE), currency),
        ranking_table(&most_discounted(table, RANKING_SIZE), currency),
        cur = escape_html(currency),
        cap = cap
    );

    html.push_str("<h2>Price vs rating</h2>\n");
    chart(&mut html, "price-rating", &scatter_figure(table));

    html.push_str("<h2>Promotions over time</h2>\n");
    chart(&mut html, "promotions-by-month", &monthly_figure(table));

    let _ = write!(
        html,
        r#"<h2>Observations</h2>
<ul>
<li>The cheapest titles show where low-cost picks are concentrated.</li>
<li>Well rated games at {cur}{cap} or less point to the best deals for buyers.</li>
<li>Price against rating shows whether expensive games also review better.</li>
<li>Promotions per month help spot seasonal sale patterns.</li>
</ul>
</body>
</html>
"#,
        cur = escape_html(currency),
        cap = cap
    );

    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SaleListingRow;

    fn table() -> ListingTable {
        ListingTable::from_rows(&[
            SaleListingRow {
                name: "Tom & Jerry <Remastered>".into(),
                price: "₪12.00".into(),
                rating: "88%".into(),
                sale_starts_at: "05 Nov 2024".into(),
                sale_ends_at: "12 Nov 2024".into(),
                app_id: "1".into(),
                ..Default::default()
            },
            SaleListingRow {
                name: "</script><script>alert(1)</script>".into(),
                price: "₪60.00".into(),
                rating: "75%".into(),
                app_id: "2".into(),
                ..Default::default()
            },
        ])
    }

    #[test]
    fn page_has_every_section() {
        let html = render_page(&table(), &RenderOptions::default());

        for needle in [
            "price-histogram",
            "Top 10 most expensive",
            "Top 10 cheapest",
            "Best rated at ₪20 or less",
            "price-rating",
            "promotions-by-month",
            "Observations",
        ] {
            assert!(html.contains(needle), "missing {needle}");
        }
        assert_eq!(html.matches("<li>").count(), 4);
    }

    #[test]
    fn names_are_escaped_in_tables_and_scripts() {
        let html = render_page(&table(), &RenderOptions::default());

        assert!(html.contains("Tom &amp; Jerry &lt;Remastered&gt;"));
        assert!(!html.contains("</script><script>alert(1)"));
        assert_eq!(html.matches("<script>Plotly").count(), 3);
    }

    #[test]
    fn empty_table_renders_placeholders() {
        let html = render_page(&ListingTable::default(), &RenderOptions::default());
        assert!(html.contains("0 games on sale"));
        assert!(html.contains("No games match."));
    }

    #[test]
    fn monthly_figure_uses_month_starts() {
        let fig = monthly_figure(&table());
        assert_eq!(fig["data"][0]["x"], json!(["2024-11-01"]));
        assert_eq!(fig["data"][0]["y"], json!([1]));
    }
}
