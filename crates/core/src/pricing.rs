use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::quote::{Quote, QuoteLine};

/// Derived quote amounts. Alternative amounts exist only when some line carries an
/// alternative price.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteTotals {
    pub parts_original: Decimal,
    pub parts_alternative: Option<Decimal>,
    pub total_original: Decimal,
    pub total_alternative: Option<Decimal>,
}

pub fn totals(lines: &[QuoteLine], labor: Decimal) -> QuoteTotals {
    let parts_original: Decimal = lines.iter().map(QuoteLine::subtotal_original).sum();
    let parts_alternative = lines
        .iter()
        .any(QuoteLine::has_alternative)
        .then(|| lines.iter().map(QuoteLine::subtotal_alternative).sum::<Decimal>());

    QuoteTotals {
        parts_original,
        parts_alternative,
        total_original: parts_original + labor,
        total_alternative: parts_alternative.map(|parts| parts + labor),
    }
}

/// Recomputes every derived amount from the quote's lines and labor.
pub fn recalculate(quote: &mut Quote) {
    let QuoteTotals { parts_original, parts_alternative, total_original, total_alternative } =
        totals(&quote.lines, quote.labor);
    quote.parts_original = parts_original;
    quote.parts_alternative = parts_alternative;
    quote.total_original = total_original;
    quote.total_alternative = total_alternative;
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use crate::domain::quote::{Quote, QuoteId, QuoteLine, QuoteLineId, QuoteStatus};
    use crate::domain::service::ServiceId;
    use crate::pricing::{recalculate, totals};

    fn line(id: i64, quantity: u32, original: Decimal, alternative: Option<Decimal>) -> QuoteLine {
        QuoteLine {
            id: QuoteLineId(id),
            quote_id: QuoteId(1),
            description: format!("linea {id}"),
            quantity,
            original_price: original,
            alternative_price: alternative,
        }
    }

    fn empty_quote(labor: Decimal) -> Quote {
        Quote {
            id: QuoteId(1),
            number: "PRE25-00001".to_string(),
            service_id: ServiceId(1),
            employee_id: 1,
            diagnosis: None,
            lines: Vec::new(),
            parts_original: Decimal::ZERO,
            parts_alternative: None,
            labor,
            total_original: Decimal::ZERO,
            total_alternative: None,
            show_original: true,
            show_alternative: true,
            confirmed_variant: None,
            confirmation_channel: None,
            confirmed_at: None,
            status: QuoteStatus::Pending,
            created_at: Utc::now(),
            requested_on: None,
            agreed_on: None,
            expires_on: None,
        }
    }

    #[test]
    fn single_line_with_labor() {
        let mut quote = empty_quote(Decimal::new(5_000, 2));
        quote.lines.push(line(1, 2, Decimal::new(10_000, 2), None));

        recalculate(&mut quote);

        assert_eq!(quote.parts_original, Decimal::new(20_000, 2));
        assert_eq!(quote.total_original, Decimal::new(25_000, 2));
        assert_eq!(quote.parts_alternative, None);
        assert_eq!(quote.total_alternative, None);
        assert!(!quote.has_alternative());
    }

    #[test]
    fn alternative_amounts_only_count_lines_with_alternative_price() {
        let lines = vec![
            line(1, 2, Decimal::new(10_000, 2), Some(Decimal::new(6_000, 2))),
            line(2, 1, Decimal::new(3_000, 2), None),
        ];

        let totals = totals(&lines, Decimal::new(5_000, 2));

        assert_eq!(totals.parts_original, Decimal::new(23_000, 2));
        assert_eq!(totals.total_original, Decimal::new(28_000, 2));
        assert_eq!(totals.parts_alternative, Some(Decimal::new(12_000, 2)));
        assert_eq!(totals.total_alternative, Some(Decimal::new(17_000, 2)));
    }

    #[test]
    fn totals_track_every_edit() {
        let labor = Decimal::new(1_250, 2);
        let mut quote = empty_quote(labor);
        let mut expected = labor;

        for (id, quantity, cents) in [(1, 1, 4_999), (2, 3, 1_001), (3, 7, 10)] {
            let price = Decimal::new(cents, 2);
            quote.lines.push(line(id, quantity, price, None));
            recalculate(&mut quote);
            expected += price * Decimal::from(quantity);
            assert_eq!(quote.total_original, quote.parts_original + quote.labor);
            assert_eq!(quote.total_original, expected);
        }

        quote.lines.retain(|line| line.id != QuoteLineId(2));
        recalculate(&mut quote);
        assert_eq!(quote.total_original, labor + Decimal::new(4_999, 2) + Decimal::new(70, 2));

        quote.labor = Decimal::ZERO;
        recalculate(&mut quote);
        assert_eq!(quote.total_original, quote.parts_original);
    }

    #[test]
    fn removing_the_last_alternative_line_drops_alternative_amounts() {
        let mut quote = empty_quote(Decimal::new(1_000, 2));
        quote.lines.push(line(1, 1, Decimal::new(2_000, 2), Some(Decimal::new(1_500, 2))));
        recalculate(&mut quote);
        assert_eq!(quote.total_alternative, Some(Decimal::new(2_500, 2)));

        quote.lines.clear();
        recalculate(&mut quote);
        assert_eq!(quote.total_alternative, None);
        assert_eq!(quote.total_original, Decimal::new(1_000, 2));
    }
}
